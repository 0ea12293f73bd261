use bitflags::bitflags;
use ndarray::{s, Array1, Array2};

bitflags! {
    /// Functionality flags for contexts
    #[derive(Default)]
    pub struct Flag: u32 {
        /// Allocate backward edges for Viterbi decoding
        const VITERBI = 0x01;
        /// Allocate exponent and expectation tables for forward-backward
        const MARGINALS = 0x02;
    }
}

bitflags! {
    /// Reset flags
    pub struct Reset: u32 {
        /// Reset state scores
        const STATE = 0x01;
        /// Reset transition scores
        const TRANS = 0x02;
        /// Reset all
        const ALL = 0xFF;
    }
}

/// Lattice of a single instance
///
/// Shared by the tagger and by the trainers. Buffers grow to the longest
/// sequence seen and are reused afterwards.
#[derive(Debug, Clone)]
pub struct Context {
    /// Flag specifying the functionality
    flag: Flag,
    /// The total number of distinct labels
    pub num_labels: usize,
    /// The number of items in the instance
    pub num_items: usize,
    /// Allocated number of items
    cap_items: usize,
    /// Logarithm of the normalization factor for the instance.
    ///
    /// This is equivalent to the total scores of all paths in the lattice.
    log_norm: f64,
    /// State scores
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents total score
    /// of state features associating label #l at #t.
    pub state: Array2<f64>,
    /// Transition scores
    ///
    /// This is a `[L][L]` matrix whose element `[i][j]` represents the total
    /// score of transition features associating labels #i and #j.
    pub trans: Array2<f64>,
    /// Alpha score matrix
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the total
    /// score of paths starting at BOS and arriving at (t, l). Viterbi reuses
    /// it for the best partial path scores.
    alpha_score: Array2<f64>,
    /// Beta score matrix
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the total
    /// score of paths starting at (t, l) and arriving at EOS.
    beta_score: Array2<f64>,
    /// Scale factor vector
    ///
    /// This is a `[T]` vector whose element `[t]` presents the scaling
    /// coefficient for the alpha_score and beta_score.
    scale_factor: Array1<f64>,
    /// Row vector (work space)
    row: Array1<f64>,
    /// Backward edges
    ///
    /// This is a `[T][L]` matrix whose element `[t][j]` represents the label #i
    /// that yields the maximum score to arrive at (t, j).
    backward_edge: Array2<u32>,
    /// Exponents of state scores
    exp_state: Array2<f64>,
    /// Exponents of transition scores.
    exp_trans: Array2<f64>,
    /// Model expectations of states.
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the model
    /// expectation (marginal probability) of the state (t,l)
    mexp_state: Array2<f64>,
    /// Model expectations of transitions.
    ///
    /// This is a `[L][L]` matrix whose element `[i][j]` presents the model
    /// expectation of the transition (i--j), summed over positions.
    mexp_trans: Array2<f64>,
}

impl Context {
    pub fn new(flag: Flag, l: usize, t: usize) -> Self {
        let (exp_trans, mexp_trans) = if flag.contains(Flag::MARGINALS) {
            (Array2::zeros((l, l)), Array2::zeros((l, l)))
        } else {
            (Array2::zeros((0, 0)), Array2::zeros((0, 0)))
        };

        let mut ctx = Self {
            flag,
            num_labels: l,
            num_items: 0,
            cap_items: 0,
            log_norm: 0.0,
            state: Array2::zeros((0, l)),
            trans: Array2::zeros((l, l)),
            alpha_score: Array2::zeros((0, l)),
            beta_score: Array2::zeros((0, l)),
            scale_factor: Array1::zeros(0),
            row: Array1::zeros(l),
            backward_edge: Array2::zeros((0, l)),
            exp_state: Array2::zeros((0, l)),
            exp_trans,
            mexp_state: Array2::zeros((0, l)),
            mexp_trans,
        };
        // t gives the 'hint' for maximum length of items.
        ctx.set_num_items(t);
        ctx.num_items = 0;
        ctx
    }

    pub fn set_num_items(&mut self, t: usize) {
        self.num_items = t;
        if self.cap_items < t {
            let l = self.num_labels;

            self.alpha_score = Array2::zeros((t, l));
            self.scale_factor = Array1::zeros(t);
            self.state = Array2::zeros((t, l));

            if self.flag.contains(Flag::VITERBI) {
                self.backward_edge = Array2::zeros((t, l));
            }

            if self.flag.contains(Flag::MARGINALS) {
                self.beta_score = Array2::zeros((t, l));
                self.exp_state = Array2::zeros((t, l));
                self.mexp_state = Array2::zeros((t, l));
            }

            self.cap_items = t;
        }
    }

    pub fn reset(&mut self, flag: Reset) {
        let t = self.num_items;

        if flag.contains(Reset::STATE) {
            self.state.slice_mut(s![..t, ..]).fill(0.0);
        }
        if flag.contains(Reset::TRANS) {
            self.trans.fill(0.0);
        }
        if self.flag.contains(Flag::MARGINALS) {
            self.mexp_state.slice_mut(s![..t, ..]).fill(0.0);
            self.mexp_trans.fill(0.0);
            self.log_norm = 0.0;
        }
    }

    pub fn exp_state(&mut self) {
        let t = self.num_items;
        let mut exp_state = self.exp_state.slice_mut(s![..t, ..]);
        exp_state.assign(&self.state.slice(s![..t, ..]));
        exp_state.mapv_inplace(f64::exp);
    }

    pub fn exp_transition(&mut self) {
        self.exp_trans.assign(&self.trans);
        self.exp_trans.mapv_inplace(f64::exp);
    }

    /// Scaled forward pass. Requires `exp_state` and `exp_transition`.
    pub fn alpha_score(&mut self) {
        let l = self.num_labels;
        let t_len = self.num_items;
        if t_len == 0 {
            self.log_norm = 0.0;
            return;
        }

        // Compute the alpha scores on nodes (0, *).
        let mut sum = 0.0;
        for j in 0..l {
            let score = self.exp_state[[0, j]];
            self.alpha_score[[0, j]] = score;
            sum += score;
        }
        self.normalize_alpha(0, sum);

        // Compute the alpha scores on nodes (t, *).
        for t in 1..t_len {
            let mut sum = 0.0;
            for j in 0..l {
                let mut score = 0.0;
                for i in 0..l {
                    score += self.alpha_score[[t - 1, i]] * self.exp_trans[[i, j]];
                }
                score *= self.exp_state[[t, j]];
                self.alpha_score[[t, j]] = score;
                sum += score;
            }
            self.normalize_alpha(t, sum);
        }

        // log(Z) is recovered from the scale factors.
        self.log_norm = -self
            .scale_factor
            .slice(s![..t_len])
            .iter()
            .map(|scale| scale.ln())
            .sum::<f64>();
    }

    fn normalize_alpha(&mut self, t: usize, sum: f64) {
        let scale = 1.0 / sum;
        self.scale_factor[t] = scale;
        self.alpha_score.row_mut(t).mapv_inplace(|v| v * scale);
    }

    /// Scaled backward pass, run after [`alpha_score`](Self::alpha_score).
    pub fn beta_score(&mut self) {
        let l = self.num_labels;
        let t_len = self.num_items;
        if t_len == 0 {
            return;
        }

        // Initialize the beta scores at (T-1, *).
        let last = t_len - 1;
        let scale = self.scale_factor[last];
        self.beta_score.row_mut(last).fill(scale);

        // Compute the beta scores at (t, *).
        for t in (0..last).rev() {
            for j in 0..l {
                self.row[j] = self.exp_state[[t + 1, j]] * self.beta_score[[t + 1, j]];
            }
            let scale = self.scale_factor[t];
            for i in 0..l {
                let mut score = 0.0;
                for j in 0..l {
                    score += self.exp_trans[[i, j]] * self.row[j];
                }
                self.beta_score[[t, i]] = score * scale;
            }
        }
    }

    /// Compute state and transition marginals from the alpha/beta tables.
    pub fn marginals(&mut self) {
        let l = self.num_labels;
        let t_len = self.num_items;

        // p(t,i) = alpha[t][i] * beta[t][i] / scale[t]
        for t in 0..t_len {
            let coeff = 1.0 / self.scale_factor[t];
            for i in 0..l {
                self.mexp_state[[t, i]] = self.alpha_score[[t, i]] * self.beta_score[[t, i]] * coeff;
            }
        }

        // p(t,i,t+1,j) = alpha[t][i] * trans[i][j] * state[t+1][j] * beta[t+1][j]
        self.mexp_trans.fill(0.0);
        for t in 0..t_len.saturating_sub(1) {
            for j in 0..l {
                self.row[j] = self.exp_state[[t + 1, j]] * self.beta_score[[t + 1, j]];
            }
            for i in 0..l {
                let alpha = self.alpha_score[[t, i]];
                for j in 0..l {
                    self.mexp_trans[[i, j]] += alpha * self.exp_trans[[i, j]] * self.row[j];
                }
            }
        }
    }

    /// Run the forward-backward algorithm and fill the marginals.
    ///
    /// Returns the log of the partition function.
    pub fn forward_backward(&mut self) -> f64 {
        self.exp_state();
        self.alpha_score();
        self.beta_score();
        self.marginals();
        self.log_norm
    }

    pub fn lognorm(&self) -> f64 {
        self.log_norm
    }

    /// Marginal probability of label `l` at position `t`.
    pub fn marginal_point(&self, l: usize, t: usize) -> f64 {
        self.mexp_state[[t, l]]
    }

    pub fn mexp_state(&self) -> &Array2<f64> {
        &self.mexp_state
    }

    pub fn mexp_trans(&self) -> &Array2<f64> {
        &self.mexp_trans
    }

    /// Unnormalized log score of a label path.
    pub fn score(&self, labels: &[u32]) -> f64 {
        let mut prev = None;
        let mut score = 0.0;
        for (t, &label) in labels.iter().enumerate().take(self.num_items) {
            let cur = label as usize;
            score += self.state[[t, cur]];
            if let Some(prev) = prev {
                score += self.trans[[prev, cur]];
            }
            prev = Some(cur);
        }
        score
    }

    /// Find the best label path.
    ///
    /// Ties are resolved in favor of the lowest label id.
    pub fn viterbi(&mut self) -> (Vec<u32>, f64) {
        let l = self.num_labels;
        let t_len = self.num_items;
        if t_len == 0 || l == 0 {
            return (Vec::new(), 0.0);
        }

        // Compute the scores at (0, *)
        for j in 0..l {
            self.alpha_score[[0, j]] = self.state[[0, j]];
        }

        // Compute the scores at (t, *)
        for t in 1..t_len {
            // Compute the score of (t, j)
            for j in 0..l {
                let mut max_score = f64::NEG_INFINITY;
                let mut argmax_score = 0;

                for i in 0..l {
                    // Transit from (t-1, i) to (t, j)
                    let score = self.alpha_score[[t - 1, i]] + self.trans[[i, j]];

                    // Store this path if it has the maximum score
                    if max_score < score {
                        max_score = score;
                        argmax_score = i;
                    }
                }

                // Backward link (#t, #j) -> (#t-1, #i)
                self.backward_edge[[t, j]] = argmax_score as u32;

                // Add the state score on (t, j)
                self.alpha_score[[t, j]] = max_score + self.state[[t, j]];
            }
        }

        // Find the node (#T, Ei) that reaches EOS with the maximum score
        let mut max_score = f64::NEG_INFINITY;
        let mut labels = vec![0u32; t_len];
        for (i, &score) in self.alpha_score.row(t_len - 1).iter().enumerate() {
            if max_score < score {
                max_score = score;
                labels[t_len - 1] = i as u32;
            }
        }

        // Tag labels by tracing the backward links
        for t in (0..t_len - 1).rev() {
            let next_label = labels[t + 1] as usize;
            labels[t] = self.backward_edge[[t + 1, next_label]];
        }

        (labels, max_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(Flag::all(), Flag::VITERBI | Flag::MARGINALS);
        assert!(Flag::default().is_empty());
    }

    fn toy_context() -> Context {
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, 2, 0);
        ctx.set_num_items(3);
        ctx.reset(Reset::ALL);
        ctx.state[[0, 0]] = 1.0;
        ctx.state[[1, 1]] = 0.5;
        ctx.state[[2, 0]] = 0.25;
        ctx.trans[[0, 1]] = 0.3;
        ctx.trans[[1, 0]] = -0.2;
        ctx.exp_transition();
        ctx
    }

    /// Enumerate all 2^3 paths to get the exact partition function.
    fn brute_force_lognorm(ctx: &Context) -> f64 {
        let mut total = 0.0;
        for a in 0..2u32 {
            for b in 0..2u32 {
                for c in 0..2u32 {
                    total += ctx.score(&[a, b, c]).exp();
                }
            }
        }
        total.ln()
    }

    #[test]
    fn test_context_reset() {
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, 2, 0);
        ctx.reset(Reset::STATE);
        ctx.reset(Reset::TRANS);
        ctx.reset(Reset::STATE | Reset::TRANS);
        ctx.set_num_items(4);
        ctx.state[[3, 1]] = 2.0;
        ctx.reset(Reset::STATE);
        assert_eq!(ctx.state[[3, 1]], 0.0);
    }

    #[test]
    fn test_forward_backward_matches_enumeration() {
        let mut ctx = toy_context();
        let log_z = ctx.forward_backward();
        assert!((log_z - brute_force_lognorm(&ctx)).abs() < 1e-10);

        // Marginals at each position sum to one.
        for t in 0..3 {
            let sum: f64 = (0..2).map(|l| ctx.marginal_point(l, t)).sum();
            assert!((sum - 1.0).abs() < 1e-10);
        }
        // Transition expectations cover T-1 edges.
        assert!((ctx.mexp_trans().sum() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_viterbi_finds_best_path() {
        let mut ctx = toy_context();
        let (labels, score) = ctx.viterbi();

        let mut best = (Vec::new(), f64::NEG_INFINITY);
        for a in 0..2u32 {
            for b in 0..2u32 {
                for c in 0..2u32 {
                    let s = ctx.score(&[a, b, c]);
                    if s > best.1 {
                        best = (vec![a, b, c], s);
                    }
                }
            }
        }
        assert_eq!(labels, best.0);
        assert!((score - best.1).abs() < 1e-12);
    }

    #[test]
    fn test_viterbi_ties_prefer_lowest_label() {
        let mut ctx = Context::new(Flag::VITERBI, 3, 2);
        ctx.set_num_items(2);
        ctx.reset(Reset::ALL);
        let (labels, score) = ctx.viterbi();
        assert_eq!(labels, vec![0, 0]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_empty_sequence() {
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, 2, 0);
        ctx.set_num_items(0);
        ctx.reset(Reset::ALL);
        assert_eq!(ctx.viterbi(), (Vec::new(), 0.0));
        assert_eq!(ctx.forward_backward(), 0.0);
    }
}
