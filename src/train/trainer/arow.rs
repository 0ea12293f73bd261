use log::log;
use rand::seq::SliceRandom;

use super::super::crf_context::ScoreContext;
use super::super::params::{ParamSet, ParamValue};
use super::super::session::{FeatureDelta, Session};
use super::averaged_perceptron::num_mismatches;
use super::TrainingAlgorithm;
use crate::error::{Error, Result};

/// AROW (Adaptive Regularization of Weights) training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ArowParams {
    variance: f64,
    gamma: f64,
    max_iterations: usize,
    epsilon: f64,
}

impl Default for ArowParams {
    fn default() -> Self {
        Self {
            variance: 1.0,
            gamma: 1.0,
            max_iterations: 100,
            epsilon: 0.0,
        }
    }
}

impl ArowParams {
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Set the initial variance of every feature weight.
    pub fn set_variance(&mut self, variance: f64) -> Result<()> {
        if !(variance > 0.0) {
            return Err(Error::invalid_input("variance must be positive"));
        }
        self.variance = variance;
        Ok(())
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Set the tradeoff between loss and regularization.
    pub fn set_gamma(&mut self, gamma: f64) -> Result<()> {
        if !(gamma > 0.0) {
            return Err(Error::invalid_input("gamma must be positive"));
        }
        self.gamma = gamma;
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
        self.epsilon = epsilon;
        Ok(())
    }
}

impl ParamSet for ArowParams {
    fn names(&self) -> &'static [&'static str] {
        &["variance", "gamma", "max_iterations", "epsilon"]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "variance" => ParamValue::Float(self.variance),
            "gamma" => ParamValue::Float(self.gamma),
            "max_iterations" => ParamValue::Int(self.max_iterations as i64),
            "epsilon" => ParamValue::Float(self.epsilon),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "variance" => self.set_variance(value.into_f64(name)?),
            "gamma" => self.set_gamma(value.into_f64(name)?),
            "max_iterations" => self.set_max_iterations(value.into_usize(name)?),
            "epsilon" => self.set_epsilon(value.into_f64(name)?),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

/// Mean weights with a diagonal covariance
#[derive(Debug)]
struct Gaussian {
    mean: Vec<f64>,
    cov: Vec<f64>,
    gamma: f64,
}

impl Gaussian {
    /// Move towards `delta` for a margin violation of `cost`.
    ///
    /// `delta` is scaled by the instance weight before use.
    fn update(&mut self, delta: &FeatureDelta, cost: f64, weight: f64) {
        let frac = self.gamma
            + delta
                .iter()
                .map(|(fid, v)| (v * weight).powi(2) * self.cov[fid])
                .sum::<f64>();
        let alpha = cost / frac;

        for (fid, v) in delta.iter() {
            let x = v * weight;
            let sigma = self.cov[fid];
            self.mean[fid] += alpha * sigma * x;
            self.cov[fid] = 1.0 / (1.0 / sigma + x * x / self.gamma);
        }
    }
}

impl TrainingAlgorithm for ArowParams {
    fn train(&self, session: &mut Session<'_>) -> Result<Vec<f64>> {
        let data = session.data;
        let fgen = data.fgen;
        let level = session.level();
        let num_features = data.num_features();
        let num_instances = data.num_instances().max(1) as f64;

        let mut model = Gaussian {
            mean: vec![0.0; num_features],
            cov: vec![self.variance; num_features],
            gamma: self.gamma,
        };
        let mut delta = FeatureDelta::new(num_features);
        let mut ctx = ScoreContext::new(data.num_labels, data.max_items);
        let mut order: Vec<usize> = (0..data.num_instances()).collect();
        let mut rng = session.rng();

        for epoch in 1..=self.max_iterations {
            session.check_cancelled()?;
            order.shuffle(&mut rng);

            let mut loss = 0.0;
            for &i in &order {
                let inst = data.instances[i];

                ctx.compute_scores(inst, fgen, &model.mean, 1.0);
                let predicted = ctx.viterbi_decode();

                let d = num_mismatches(&inst.labels, &predicted);
                if d > 0 {
                    let cost = ctx.sequence_score(&predicted) - ctx.sequence_score(&inst.labels)
                        + d as f64;
                    delta.compute(inst, &inst.labels, &predicted, fgen);
                    model.update(&delta, cost, inst.weight);
                    loss += cost * inst.weight;
                }
            }

            session.record(loss, &model.mean, 1.0)?;

            if loss / num_instances <= self.epsilon {
                log!(level, "AROW converged at epoch {}", epoch);
                break;
            }
        }

        Ok(model.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attribute, Instance};
    use crate::train::feature_gen::{FeatureGenerator, FeatureParams};

    #[test]
    fn test_gaussian_update() {
        let mut inst = Instance::with_capacity(1);
        inst.push(vec![Attribute::new(0, 1.0)], 0);
        let mut params = FeatureParams::default();
        params.set_possible_states(true);
        let fgen = FeatureGenerator::generate(&[&inst], 1, 2, &params).unwrap();

        let mut delta = FeatureDelta::new(fgen.num_features());
        delta.compute(&inst, &[0], &[1], &fgen);

        let mut model = Gaussian {
            mean: vec![0.0; 2],
            cov: vec![1.0; 2],
            gamma: 1.0,
        };
        // frac = 1 + 1 + 1, alpha = 1
        model.update(&delta, 3.0, 1.0);
        assert_eq!(model.mean, vec![1.0, -1.0]);
        assert_eq!(model.cov, vec![0.5, 0.5]);
    }

    #[test]
    fn test_params() {
        let mut params = ArowParams::default();
        assert!(params.set_variance(0.0).is_err());
        assert!(params.set_gamma(-1.0).is_err());
        params.set("gamma", ParamValue::Float(2.0)).unwrap();
        assert_eq!(params.gamma(), 2.0);
        assert!(matches!(
            params.set("c", ParamValue::Float(1.0)),
            Err(Error::NotFound(_))
        ));
    }
}
