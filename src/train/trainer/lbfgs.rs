use std::cell::{Cell, RefCell};
use std::fmt;
use std::str::FromStr;

use log::{log, warn};

use super::super::crf_context::ForwardBackwardContext;
use super::super::params::{ParamSet, ParamValue};
use super::super::session::Session;
use super::TrainingAlgorithm;
use crate::error::{Error, Result};

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearchAlgorithm {
    /// More-Thuente line search (default, CRFsuite default)
    #[default]
    MoreThuente,
    /// Backtracking with Armijo condition
    BacktrackingArmijo,
    /// Backtracking with Wolfe condition
    BacktrackingWolfe,
    /// Backtracking with strong Wolfe condition
    BacktrackingStrongWolfe,
}

impl LineSearchAlgorithm {
    fn to_liblbfgs_str(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingArmijo => "BacktrackingArmijo",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
            Self::BacktrackingStrongWolfe => "BacktrackingStrongWolfe",
        }
    }
}

impl fmt::Display for LineSearchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_liblbfgs_str())
    }
}

impl FromStr for LineSearchAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MoreThuente" => Ok(Self::MoreThuente),
            "BacktrackingArmijo" => Ok(Self::BacktrackingArmijo),
            "Backtracking" | "BacktrackingWolfe" => Ok(Self::BacktrackingWolfe),
            "StrongBacktracking" | "BacktrackingStrongWolfe" => Ok(Self::BacktrackingStrongWolfe),
            _ => Err(Error::invalid_input(format!(
                "unknown line search algorithm: {}",
                s
            ))),
        }
    }
}

/// L-BFGS training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsParams {
    c1: f64,
    c2: f64,
    num_memories: usize,
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            c1: 0.0,
            c2: 1.0,
            num_memories: 6,
            max_iterations: i32::MAX as usize,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-5,
            linesearch: LineSearchAlgorithm::default(),
            max_linesearch: 20,
        }
    }
}

impl LbfgsParams {
    pub fn c1(&self) -> f64 {
        self.c1
    }

    pub fn set_c1(&mut self, c1: f64) -> Result<()> {
        if !(c1 >= 0.0) {
            return Err(Error::invalid_input("c1 must be non-negative"));
        }
        self.c1 = c1;
        Ok(())
    }

    pub fn c2(&self) -> f64 {
        self.c2
    }

    pub fn set_c2(&mut self, c2: f64) -> Result<()> {
        if !(c2 >= 0.0) {
            return Err(Error::invalid_input("c2 must be non-negative"));
        }
        self.c2 = c2;
        Ok(())
    }

    pub fn num_memories(&self) -> usize {
        self.num_memories
    }

    pub fn set_num_memories(&mut self, num_memories: usize) -> Result<()> {
        if num_memories < 1 {
            return Err(Error::invalid_input("num_memories must be at least 1"));
        }
        self.num_memories = num_memories;
        Ok(())
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(Error::invalid_input("max_iterations must be at least 1"));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if !(epsilon >= 0.0) {
            return Err(Error::invalid_input("epsilon must be non-negative"));
        }
        // liblbfgs rejects -0.0
        self.epsilon = epsilon.abs();
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Set the period for delta-based convergence test.
    ///
    /// Setting period to 0 disables the delta-based convergence test
    /// (only gradient-based epsilon test is used).
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(delta >= 0.0) {
            return Err(Error::invalid_input("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(Error::invalid_input("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }
}

impl ParamSet for LbfgsParams {
    fn names(&self) -> &'static [&'static str] {
        &[
            "c1",
            "c2",
            "num_memories",
            "max_iterations",
            "epsilon",
            "period",
            "delta",
            "linesearch",
            "max_linesearch",
        ]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "c1" => ParamValue::Float(self.c1),
            "c2" => ParamValue::Float(self.c2),
            "num_memories" => ParamValue::Int(self.num_memories as i64),
            "max_iterations" => ParamValue::Int(self.max_iterations as i64),
            "epsilon" => ParamValue::Float(self.epsilon),
            "period" => ParamValue::Int(self.period as i64),
            "delta" => ParamValue::Float(self.delta),
            "linesearch" => ParamValue::Str(self.linesearch.to_string()),
            "max_linesearch" => ParamValue::Int(self.max_linesearch as i64),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "c1" => self.set_c1(value.into_f64(name)?),
            "c2" => self.set_c2(value.into_f64(name)?),
            "num_memories" => self.set_num_memories(value.into_usize(name)?),
            "max_iterations" => self.set_max_iterations(value.into_usize(name)?),
            "epsilon" => self.set_epsilon(value.into_f64(name)?),
            "period" => {
                self.set_period(value.into_usize(name)?);
                Ok(())
            }
            "delta" => self.set_delta(value.into_f64(name)?),
            "linesearch" => {
                self.set_linesearch(value.into_string(name)?.parse()?);
                Ok(())
            }
            "max_linesearch" => self.set_max_linesearch(value.into_usize(name)?),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

impl TrainingAlgorithm for LbfgsParams {
    /// Minimize the regularized negative log-likelihood.
    fn train(&self, session: &mut Session<'_>) -> Result<Vec<f64>> {
        session.check_cancelled()?;
        let data = session.data;
        let fgen = data.fgen;
        let num_features = data.num_features();
        let level = session.level();
        let c1 = self.c1;
        let c2 = self.c2;

        // Initialize weights to zero
        let mut weights = vec![0.0; num_features];
        let mut ctx = ForwardBackwardContext::new(data.num_labels, data.max_items);

        // Last evaluated point, and the last point accepted by the line search
        let latest = RefCell::new(vec![0.0; num_features]);
        let mut best = vec![0.0; num_features];
        let diverged = Cell::new(false);
        let mut stop: Option<Error> = None;

        // Objective function: negative log-likelihood + L2 regularization
        let evaluate = |x: &[f64], gx: &mut [f64]| -> Result<f64, anyhow::Error> {
            latest.borrow_mut().copy_from_slice(x);
            gx.fill(0.0);

            ctx.transition_score(fgen, x, 1.0);
            let mut loss = 0.0;
            for inst in data.instances {
                ctx.state_score(inst, fgen, x, 1.0);
                ctx.forward_backward();
                loss -= ctx.log_likelihood(inst) * inst.weight;
                // Gradient = expected - observed, weighted by instance weight
                ctx.accumulate_gradient(inst, fgen, gx, inst.weight);
            }

            // Factor of 2 comes from derivative of c2 * x[i]^2 -> 2 * c2 * x[i]
            if c2 > 0.0 {
                let two_c2 = c2 * 2.0;
                for (g, &w) in gx.iter_mut().zip(x) {
                    *g += two_c2 * w;
                    loss += c2 * w * w;
                }
            }

            if !loss.is_finite() {
                diverged.set(true);
                anyhow::bail!("the objective became non-finite");
            }
            Ok(loss)
        };

        // Progress callback, returning true stops the optimization
        let progress = |prgr: &liblbfgs::Progress| -> bool {
            best.copy_from_slice(&latest.borrow());
            log!(
                level,
                "||x|| = {:.6}, ||g|| = {:.6}",
                prgr.xnorm,
                prgr.gnorm
            );
            let outcome = session
                .record(prgr.fx, &best, 1.0)
                .and_then(|()| session.check_cancelled());
            match outcome {
                Ok(()) => false,
                Err(err) => {
                    stop = Some(err);
                    true
                }
            }
        };

        // The liblbfgs crate does not expose the number of limited memories,
        // so `num_memories` is recorded but the optimizer keeps its default.
        let mut lbfgs = liblbfgs::lbfgs()
            .with_max_iterations(self.max_iterations)
            .with_epsilon(self.epsilon)
            .with_fx_delta(self.delta, self.period)
            .with_max_linesearch(self.max_linesearch);

        // OWL-QN only supports backtracking line search, so we force it here
        // regardless of the configured linesearch algorithm.
        if c1 > 0.0 {
            lbfgs = lbfgs
                .with_linesearch_algorithm("BacktrackingStrongWolfe")
                .with_orthantwise(c1, 0, num_features);
        } else {
            lbfgs = lbfgs.with_linesearch_algorithm(self.linesearch.to_liblbfgs_str());
        }

        let result = lbfgs.minimize(&mut weights, evaluate, progress);

        let completed = session.num_iterations();
        if let Some(err) = stop {
            return Err(err);
        }
        if diverged.get() {
            return Err(Error::training(format!(
                "loss became non-finite at iteration {}",
                completed + 1
            )));
        }
        match result {
            Ok(report) => {
                log!(level, "L-BFGS terminated after {} iterations, loss = {:.6}", completed, report.fx);
            }
            Err(err) => {
                warn!(
                    "L-BFGS terminated with an error after {} iterations: {}",
                    completed, err
                );
            }
        }

        // The last accepted iterate, the starting point if none was accepted
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linesearch_names() {
        assert_eq!(
            "Backtracking".parse::<LineSearchAlgorithm>().unwrap(),
            LineSearchAlgorithm::BacktrackingWolfe
        );
        assert_eq!(
            "StrongBacktracking".parse::<LineSearchAlgorithm>().unwrap(),
            LineSearchAlgorithm::BacktrackingStrongWolfe
        );
        assert!("Newton".parse::<LineSearchAlgorithm>().is_err());
        assert_eq!(LineSearchAlgorithm::default().to_string(), "MoreThuente");
    }

    #[test]
    fn test_params_validation() {
        let mut params = LbfgsParams::default();
        assert!(params.set_c1(-1.0).is_err());
        assert!(params.set_c2(f64::NAN).is_err());
        assert!(params.set_num_memories(0).is_err());
        assert!(params.set_max_iterations(0).is_err());
        assert!(params.set_max_linesearch(0).is_err());
        params.set_period(0);
        assert_eq!(params.period(), 0);
        params.set_epsilon(-0.0).unwrap();
        assert!(params.epsilon().is_sign_positive());
        params
            .set("linesearch", ParamValue::Str("BacktrackingArmijo".into()))
            .unwrap();
        assert_eq!(params.linesearch(), LineSearchAlgorithm::BacktrackingArmijo);
        assert_eq!(
            params.get("max_iterations"),
            Some(ParamValue::Int(2147483647))
        );
    }
}
