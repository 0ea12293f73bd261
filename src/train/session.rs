use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{log, Level};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::crf_context::{visit_features, ScoreContext};
use super::evaluation::{Evaluation, HoldoutStats};
use super::feature_gen::FeatureGenerator;
use super::trainer::Algorithm;
use crate::alphabet::Alphabet;
use crate::dataset::Instance;
use crate::error::{Error, Result};

/// Statistics of one training iteration (epoch)
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStats {
    /// 1-based iteration number
    pub iteration: usize,
    /// Objective value: regularized negative log-likelihood for lbfgs and
    /// l2sgd, the accumulated update loss for the online algorithms
    pub loss: f64,
    /// L2 norm of the feature weights
    pub feature_norm: f64,
    /// Number of features with a non-zero weight
    pub active_features: usize,
    /// Holdout scores, when a holdout group was given
    pub holdout: Option<HoldoutStats>,
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub algorithm: Algorithm,
    /// Number of features in the stored model
    pub num_features: usize,
    pub num_labels: usize,
    /// Number of attributes in the stored model
    pub num_attributes: usize,
    pub iterations: Vec<IterationStats>,
    pub elapsed: Duration,
}

impl TrainingSummary {
    /// Loss of the last iteration
    pub fn final_loss(&self) -> Option<f64> {
        self.iterations.last().map(|stats| stats.loss)
    }
}

/// Read-only view of the training partition
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrainingData<'a> {
    pub instances: &'a [&'a Instance],
    pub fgen: &'a FeatureGenerator,
    pub num_labels: usize,
    /// Length of the longest sequence, holdout included
    pub max_items: usize,
}

impl<'a> TrainingData<'a> {
    pub fn num_features(&self) -> usize {
        self.fgen.num_features()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }
}

/// State shared between the trainer and the running algorithm
pub(crate) struct Session<'a> {
    pub data: TrainingData<'a>,
    holdout: &'a [&'a Instance],
    labels: &'a Alphabet,
    level: Level,
    seed: u64,
    cancel: Option<&'a AtomicBool>,
    holdout_ctx: ScoreContext,
    iterations: Vec<IterationStats>,
}

impl<'a> Session<'a> {
    pub fn new(
        data: TrainingData<'a>,
        holdout: &'a [&'a Instance],
        labels: &'a Alphabet,
        verbose: bool,
        seed: u64,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        Self {
            data,
            holdout,
            labels,
            level: if verbose { Level::Info } else { Level::Debug },
            seed,
            cancel,
            holdout_ctx: ScoreContext::new(data.num_labels, data.max_items),
            iterations: Vec::new(),
        }
    }

    /// Log level for progress reports
    pub fn level(&self) -> Level {
        self.level
    }

    /// Random generator for shuffling, seeded for reproducibility
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Fail with [`Error::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancelled() {
            return Err(Error::Cancelled(self.iterations.len()));
        }
        Ok(())
    }

    /// Number of iterations recorded so far
    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }

    /// Record the end of an iteration for the weights `scale * w`.
    ///
    /// Fails if the loss or any weight is not finite.
    pub fn record(&mut self, loss: f64, w: &[f64], scale: f64) -> Result<()> {
        let iteration = self.iterations.len() + 1;
        if !loss.is_finite() {
            return Err(Error::training(format!(
                "loss became non-finite at iteration {}",
                iteration
            )));
        }
        if w.iter().any(|v| !v.is_finite()) {
            return Err(Error::training(format!(
                "feature weights became non-finite at iteration {}",
                iteration
            )));
        }
        let feature_norm = scale.abs() * w.iter().map(|v| v * v).sum::<f64>().sqrt();
        let active_features = w.iter().filter(|&&v| v != 0.0).count();

        log!(self.level, "***** Iteration #{} *****", iteration);
        log!(self.level, "Loss: {:.6}", loss);
        log!(self.level, "Feature norm: {:.6}", feature_norm);
        log!(self.level, "Active features: {}", active_features);

        let holdout = if self.holdout.is_empty() {
            None
        } else {
            let stats = self.evaluate_holdout(w, scale);
            log!(self.level, "{}", stats);
            Some(stats)
        };

        self.iterations.push(IterationStats {
            iteration,
            loss,
            feature_norm,
            active_features,
            holdout,
        });
        Ok(())
    }

    /// Tag the holdout instances with the weights `scale * w`
    pub fn evaluate_holdout(&mut self, w: &[f64], scale: f64) -> HoldoutStats {
        let mut eval = Evaluation::new(self.data.num_labels);
        for inst in self.holdout {
            self.holdout_ctx.compute_scores(inst, self.data.fgen, w, scale);
            let predicted = self.holdout_ctx.viterbi_decode();
            eval.accumulate(&inst.labels, &predicted);
        }
        eval.finish(self.labels)
    }

    pub fn into_iterations(self) -> Vec<IterationStats> {
        self.iterations
    }
}

/// Sparse difference of two feature vectors, `phi(gold) - phi(pred)`
#[derive(Debug)]
pub(crate) struct FeatureDelta {
    values: Vec<f64>,
    marked: Vec<bool>,
    touched: Vec<usize>,
}

impl FeatureDelta {
    pub fn new(num_features: usize) -> Self {
        Self {
            values: vec![0.0; num_features],
            marked: vec![false; num_features],
            touched: Vec::new(),
        }
    }

    fn add(&mut self, fid: usize, value: f64) {
        if !self.marked[fid] {
            self.marked[fid] = true;
            self.touched.push(fid);
        }
        self.values[fid] += value;
    }

    /// Compute `phi(gold) - phi(pred)` for `inst`.
    pub fn compute(&mut self, inst: &Instance, gold: &[u32], pred: &[u32], fgen: &FeatureGenerator) {
        for &fid in &self.touched {
            self.values[fid] = 0.0;
            self.marked[fid] = false;
        }
        self.touched.clear();
        visit_features(inst, gold, fgen, |fid, value| self.add(fid, value));
        visit_features(inst, pred, fgen, |fid, value| self.add(fid, -value));
    }

    /// Non-zero entries
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.touched
            .iter()
            .map(move |&fid| (fid, self.values[fid]))
            .filter(|&(_, value)| value != 0.0)
    }

    /// Squared L2 norm
    pub fn norm2(&self) -> f64 {
        self.iter().map(|(_, value)| value * value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Attribute;
    use crate::train::feature_gen::FeatureParams;

    #[test]
    fn test_feature_delta() {
        let mut inst = Instance::with_capacity(2);
        inst.push(vec![Attribute::new(0, 1.0)], 0);
        inst.push(vec![Attribute::new(1, 2.0)], 1);
        let mut params = FeatureParams::default();
        params.set_possible_states(true);
        params.set_possible_transitions(true);
        let fgen = FeatureGenerator::generate(&[&inst], 2, 2, &params).unwrap();

        let mut delta = FeatureDelta::new(fgen.num_features());
        delta.compute(&inst, &[0, 1], &[0, 1], &fgen);
        assert_eq!(delta.iter().count(), 0);

        delta.compute(&inst, &[0, 1], &[0, 0], &fgen);
        // +1(1/1) -1(1/0) weighted by 2.0, and +1(0->1) -1(0->0)
        assert_eq!(delta.iter().count(), 4);
        assert!((delta.norm2() - (4.0 + 4.0 + 1.0 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_record_rejects_non_finite() {
        let mut inst = Instance::with_capacity(1);
        inst.push(vec![Attribute::new(0, 1.0)], 0);
        let fgen = FeatureGenerator::generate(&[&inst], 1, 1, &FeatureParams::default()).unwrap();
        let instances = [&inst];
        let labels: Alphabet = ["A"].iter().collect();
        let data = TrainingData {
            instances: &instances,
            fgen: &fgen,
            num_labels: 1,
            max_items: 1,
        };
        let mut session = Session::new(data, &[], &labels, false, 0, None);
        session.record(1.5, &[0.5], 1.0).unwrap();
        assert!(matches!(session.record(f64::NAN, &[0.5], 1.0), Err(Error::Training(_))));
        assert!(matches!(
            session.record(1.0, &[f64::INFINITY], 1.0),
            Err(Error::Training(_))
        ));
        let iterations = session.into_iterations();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations[0].iteration, 1);
        assert_eq!(iterations[0].active_features, 1);
    }

    #[test]
    fn test_cancellation() {
        let mut inst = Instance::with_capacity(1);
        inst.push(vec![], 0);
        let fgen = FeatureGenerator::generate(&[&inst], 0, 1, &FeatureParams::default()).unwrap();
        let instances = [&inst];
        let labels: Alphabet = ["A"].iter().collect();
        let data = TrainingData {
            instances: &instances,
            fgen: &fgen,
            num_labels: 1,
            max_items: 1,
        };
        let flag = AtomicBool::new(false);
        let session = Session::new(data, &[], &labels, false, 0, Some(&flag));
        assert!(session.check_cancelled().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(session.check_cancelled(), Err(Error::Cancelled(0))));
    }
}
