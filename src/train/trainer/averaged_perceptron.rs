use log::log;
use rand::seq::SliceRandom;

use super::super::crf_context::ScoreContext;
use super::super::params::{ParamSet, ParamValue};
use super::super::session::{FeatureDelta, Session};
use super::TrainingAlgorithm;
use crate::error::{Error, Result};

/// Averaged Perceptron training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedPerceptronParams {
    max_iterations: usize,
    epsilon: f64,
}

impl Default for AveragedPerceptronParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            epsilon: 0.0,
        }
    }
}

impl AveragedPerceptronParams {
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
        self.epsilon = epsilon;
        Ok(())
    }
}

impl ParamSet for AveragedPerceptronParams {
    fn names(&self) -> &'static [&'static str] {
        &["max_iterations", "epsilon"]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        match name {
            "max_iterations" => Some(ParamValue::Int(self.max_iterations as i64)),
            "epsilon" => Some(ParamValue::Float(self.epsilon)),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "max_iterations" => self.set_max_iterations(value.into_usize(name)?),
            "epsilon" => self.set_epsilon(value.into_f64(name)?),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

/// Weight vector with a running average over all updates.
///
/// The average is `w - ws / c`, where `ws` sums every update scaled by the
/// step it was made at.
#[derive(Debug)]
pub(super) struct AveragedWeights {
    pub w: Vec<f64>,
    ws: Vec<f64>,
    c: f64,
}

impl AveragedWeights {
    pub fn new(num_features: usize) -> Self {
        Self {
            w: vec![0.0; num_features],
            ws: vec![0.0; num_features],
            c: 1.0,
        }
    }

    /// Add `scale * delta` to the weights.
    pub fn update(&mut self, delta: &FeatureDelta, scale: f64) {
        for (fid, value) in delta.iter() {
            self.w[fid] += scale * value;
            self.ws[fid] += self.c * scale * value;
        }
    }

    /// Advance the step counter, once per instance.
    pub fn tick(&mut self) {
        self.c += 1.0;
    }

    pub fn averaged(&self) -> Vec<f64> {
        self.w
            .iter()
            .zip(&self.ws)
            .map(|(w, ws)| w - ws / self.c)
            .collect()
    }
}

/// Number of positions where two label sequences differ
pub(super) fn num_mismatches(gold: &[u32], pred: &[u32]) -> usize {
    gold.iter().zip(pred).filter(|(g, p)| g != p).count()
}

impl TrainingAlgorithm for AveragedPerceptronParams {
    fn train(&self, session: &mut Session<'_>) -> Result<Vec<f64>> {
        let data = session.data;
        let fgen = data.fgen;
        let level = session.level();
        let num_instances = data.num_instances().max(1) as f64;

        let mut weights = AveragedWeights::new(data.num_features());
        let mut delta = FeatureDelta::new(data.num_features());
        let mut ctx = ScoreContext::new(data.num_labels, data.max_items);
        let mut order: Vec<usize> = (0..data.num_instances()).collect();
        let mut rng = session.rng();

        for epoch in 1..=self.max_iterations {
            session.check_cancelled()?;
            order.shuffle(&mut rng);

            let mut loss = 0.0;
            for &i in &order {
                let inst = data.instances[i];

                // Predict with current weights
                ctx.compute_scores(inst, fgen, &weights.w, 1.0);
                let predicted = ctx.viterbi_decode();

                let d = num_mismatches(&inst.labels, &predicted);
                if d > 0 {
                    // w += phi(gold) - phi(pred)
                    delta.compute(inst, &inst.labels, &predicted, fgen);
                    weights.update(&delta, inst.weight);
                    // Loss is the ratio of wrongly predicted labels
                    loss += d as f64 / inst.len() as f64 * inst.weight;
                }
                weights.tick();
            }

            session.record(loss, &weights.averaged(), 1.0)?;

            if loss / num_instances <= self.epsilon {
                log!(level, "Averaged perceptron converged at epoch {}", epoch);
                break;
            }
        }

        Ok(weights.averaged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attribute, Instance};
    use crate::train::feature_gen::{FeatureGenerator, FeatureParams};

    #[test]
    fn test_averaged_weights() {
        let mut inst = Instance::with_capacity(1);
        inst.push(vec![Attribute::new(0, 1.0)], 0);
        let mut params = FeatureParams::default();
        params.set_possible_states(true);
        let fgen = FeatureGenerator::generate(&[&inst], 1, 2, &params).unwrap();
        // 0/0, 0/1
        assert_eq!(fgen.num_features(), 2);

        let mut delta = FeatureDelta::new(fgen.num_features());
        delta.compute(&inst, &[0], &[1], &fgen);

        let mut weights = AveragedWeights::new(2);
        weights.update(&delta, 1.0);
        weights.tick();
        weights.tick();
        // w = [1, -1], ws = [1, -1], c = 3
        assert_eq!(weights.w, vec![1.0, -1.0]);
        let avg = weights.averaged();
        assert!((avg[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((avg[1] + 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_num_mismatches() {
        assert_eq!(num_mismatches(&[0, 1, 2], &[0, 1, 2]), 0);
        assert_eq!(num_mismatches(&[0, 1, 2], &[1, 1, 0]), 2);
    }

    #[test]
    fn test_params() {
        let mut params = AveragedPerceptronParams::default();
        assert!(params.set_epsilon(-1.0).is_err());
        assert!(params.set_max_iterations(0).is_err());
        params.set("epsilon", ParamValue::Float(0.5)).unwrap();
        assert_eq!(params.get("epsilon"), Some(ParamValue::Float(0.5)));
        assert_eq!(params.get("c2"), None);
    }
}
