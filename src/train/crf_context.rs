use super::feature_gen::FeatureGenerator;
use crate::context::{Context, Flag, Reset};
use crate::dataset::Instance;

/// Fill the transition score table from a weight vector.
fn fill_transitions(ctx: &mut Context, fgen: &FeatureGenerator, w: &[f64], scale: f64) {
    ctx.reset(Reset::TRANS);
    for (i, refs) in fgen.label_refs.iter().enumerate() {
        for fid in refs.iter() {
            let feature = &fgen.features[fid];
            ctx.trans[[i, feature.dst as usize]] = w[fid] * scale;
        }
    }
}

/// Fill the state score table of `inst` from a weight vector.
fn fill_states(ctx: &mut Context, inst: &Instance, fgen: &FeatureGenerator, w: &[f64], scale: f64) {
    ctx.set_num_items(inst.len());
    ctx.reset(Reset::STATE);
    for (t, item) in inst.items.iter().enumerate() {
        for attr in item {
            let Some(refs) = fgen.attr_refs.get(attr.id as usize) else {
                continue;
            };
            for fid in refs.iter() {
                let feature = &fgen.features[fid];
                ctx.state[[t, feature.dst as usize]] += w[fid] * scale * attr.value;
            }
        }
    }
}

/// Find the transition feature `prev -> cur`
fn transition_fid(fgen: &FeatureGenerator, prev: u32, cur: u32) -> Option<usize> {
    fgen.label_refs
        .get(prev as usize)?
        .iter()
        .find(|&fid| fgen.features[fid].dst == cur)
}

/// Call `f(fid, value)` for every feature fired by `labels` on `inst`.
///
/// Only features present in the feature set are visited.
pub fn visit_features<F: FnMut(usize, f64)>(
    inst: &Instance,
    labels: &[u32],
    fgen: &FeatureGenerator,
    mut f: F,
) {
    for (item, &label) in inst.items.iter().zip(labels) {
        for attr in item {
            let Some(refs) = fgen.attr_refs.get(attr.id as usize) else {
                continue;
            };
            for fid in refs.iter() {
                if fgen.features[fid].dst == label {
                    f(fid, attr.value);
                }
            }
        }
    }
    for pair in labels.windows(2) {
        if let Some(fid) = transition_fid(fgen, pair[0], pair[1]) {
            f(fid, 1.0);
        }
    }
}

/// Lattice for the gradient-based trainers (forward-backward)
#[derive(Debug)]
pub struct ForwardBackwardContext {
    ctx: Context,
}

impl ForwardBackwardContext {
    pub fn new(num_labels: usize, max_items: usize) -> Self {
        Self {
            ctx: Context::new(Flag::VITERBI | Flag::MARGINALS, num_labels, max_items),
        }
    }

    /// Set transition scores to `scale * w` and exponentiate them.
    pub fn transition_score(&mut self, fgen: &FeatureGenerator, w: &[f64], scale: f64) {
        fill_transitions(&mut self.ctx, fgen, w, scale);
        self.ctx.exp_transition();
    }

    /// Set the state scores of `inst` to `scale * w`.
    pub fn state_score(&mut self, inst: &Instance, fgen: &FeatureGenerator, w: &[f64], scale: f64) {
        fill_states(&mut self.ctx, inst, fgen, w, scale);
    }

    /// Run forward-backward, returning log Z.
    pub fn forward_backward(&mut self) -> f64 {
        self.ctx.forward_backward()
    }

    /// log p(y|x) of the gold labels, after [`forward_backward`](Self::forward_backward)
    pub fn log_likelihood(&self, inst: &Instance) -> f64 {
        self.ctx.score(&inst.labels) - self.ctx.lognorm()
    }

    /// Add `scale * (expected - observed)` feature counts of `inst` to `out`.
    pub fn accumulate_gradient(
        &self,
        inst: &Instance,
        fgen: &FeatureGenerator,
        out: &mut [f64],
        scale: f64,
    ) {
        let mexp_state = self.ctx.mexp_state();
        let mexp_trans = self.ctx.mexp_trans();

        // State features
        for (t, (item, &label)) in inst.items.iter().zip(&inst.labels).enumerate() {
            for attr in item {
                let Some(refs) = fgen.attr_refs.get(attr.id as usize) else {
                    continue;
                };
                for fid in refs.iter() {
                    let dst = fgen.features[fid].dst;
                    let observed = if dst == label { 1.0 } else { 0.0 };
                    out[fid] += scale * (mexp_state[[t, dst as usize]] - observed) * attr.value;
                }
            }
        }

        // Transition features, expectations summed over positions
        for (i, refs) in fgen.label_refs.iter().enumerate() {
            for fid in refs.iter() {
                let dst = fgen.features[fid].dst as usize;
                out[fid] += scale * mexp_trans[[i, dst]];
            }
        }
        for pair in inst.labels.windows(2) {
            if let Some(fid) = transition_fid(fgen, pair[0], pair[1]) {
                out[fid] -= scale;
            }
        }
    }
}

/// Lattice for the online trainers (Viterbi only)
#[derive(Debug)]
pub struct ScoreContext {
    ctx: Context,
}

impl ScoreContext {
    pub fn new(num_labels: usize, max_items: usize) -> Self {
        Self {
            ctx: Context::new(Flag::VITERBI, num_labels, max_items),
        }
    }

    /// Compute state and transition scores of `inst` as `scale * w`
    pub fn compute_scores(&mut self, inst: &Instance, fgen: &FeatureGenerator, w: &[f64], scale: f64) {
        fill_transitions(&mut self.ctx, fgen, w, scale);
        fill_states(&mut self.ctx, inst, fgen, w, scale);
    }

    pub fn viterbi_decode(&mut self) -> Vec<u32> {
        self.ctx.viterbi().0
    }

    /// Score of a label path under the current scores
    pub fn sequence_score(&self, labels: &[u32]) -> f64 {
        self.ctx.score(labels)
    }
}
