use log::log;
use rand::seq::SliceRandom;

use super::super::crf_context::ScoreContext;
use super::super::params::{ParamSet, ParamValue};
use super::super::session::{FeatureDelta, Session};
use super::averaged_perceptron::{num_mismatches, AveragedWeights};
use super::TrainingAlgorithm;
use crate::error::{Error, Result};

/// PA variants for Passive Aggressive training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaType {
    /// PA (no slack)
    Pa,
    /// PA-I (soft margin)
    PaI,
    /// PA-II (squared slack)
    PaII,
}

impl PaType {
    /// Numeric code used by the `type` parameter
    pub fn code(self) -> i64 {
        match self {
            Self::Pa => 0,
            Self::PaI => 1,
            Self::PaII => 2,
        }
    }
}

impl TryFrom<i64> for PaType {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Pa),
            1 => Ok(Self::PaI),
            2 => Ok(Self::PaII),
            _ => Err(Error::invalid_input(format!(
                "type must be 0, 1 or 2, got {}",
                code
            ))),
        }
    }
}

/// Passive Aggressive training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PassiveAggressiveParams {
    pa_type: PaType,
    c: f64,
    error_sensitive: bool,
    averaging: bool,
    max_iterations: usize,
    epsilon: f64,
}

impl Default for PassiveAggressiveParams {
    fn default() -> Self {
        Self {
            pa_type: PaType::PaI,
            c: 1.0,
            error_sensitive: true,
            averaging: true,
            max_iterations: 100,
            epsilon: 0.0,
        }
    }
}

impl PassiveAggressiveParams {
    pub fn pa_type(&self) -> PaType {
        self.pa_type
    }

    pub fn set_pa_type(&mut self, pa_type: PaType) {
        self.pa_type = pa_type;
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn set_c(&mut self, c: f64) -> Result<()> {
        if !(c > 0.0) {
            return Err(Error::invalid_input("c must be positive"));
        }
        self.c = c;
        Ok(())
    }

    pub fn error_sensitive(&self) -> bool {
        self.error_sensitive
    }

    pub fn set_error_sensitive(&mut self, enabled: bool) {
        self.error_sensitive = enabled;
    }

    pub fn averaging(&self) -> bool {
        self.averaging
    }

    pub fn set_averaging(&mut self, enabled: bool) {
        self.averaging = enabled;
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

    /// Step size for a violation of `cost` along a delta of squared norm `norm2`
    fn tau(&self, cost: f64, norm2: f64) -> f64 {
        match self.pa_type {
            PaType::Pa => cost / norm2,
            PaType::PaI => (cost / norm2).min(self.c),
            PaType::PaII => cost / (norm2 + 0.5 / self.c),
        }
    }
}

impl ParamSet for PassiveAggressiveParams {
    fn names(&self) -> &'static [&'static str] {
        &[
            "type",
            "c",
            "error_sensitive",
            "averaging",
            "max_iterations",
            "epsilon",
        ]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "type" => ParamValue::Int(self.pa_type.code()),
            "c" => ParamValue::Float(self.c),
            "error_sensitive" => ParamValue::Bool(self.error_sensitive),
            "averaging" => ParamValue::Bool(self.averaging),
            "max_iterations" => ParamValue::Int(self.max_iterations as i64),
            "epsilon" => ParamValue::Float(self.epsilon),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "type" => {
                self.set_pa_type(PaType::try_from(value.into_i64(name)?)?);
                Ok(())
            }
            "c" => self.set_c(value.into_f64(name)?),
            "error_sensitive" => {
                self.set_error_sensitive(value.into_bool(name)?);
                Ok(())
            }
            "averaging" => {
                self.set_averaging(value.into_bool(name)?);
                Ok(())
            }
            "max_iterations" => self.set_max_iterations(value.into_usize(name)?),
            "epsilon" => self.set_epsilon(value.into_f64(name)?),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

impl TrainingAlgorithm for PassiveAggressiveParams {
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
        let current = |weights: &AveragedWeights| {
            if self.averaging {
                weights.averaged()
            } else {
                weights.w.clone()
            }
        };

        for epoch in 1..=self.max_iterations {
            session.check_cancelled()?;
            order.shuffle(&mut rng);

            let mut loss = 0.0;
            for &i in &order {
                let inst = data.instances[i];

                ctx.compute_scores(inst, fgen, &weights.w, 1.0);
                let predicted = ctx.viterbi_decode();

                let d = num_mismatches(&inst.labels, &predicted);
                if d > 0 {
                    let margin = ctx.sequence_score(&predicted) - ctx.sequence_score(&inst.labels);
                    let cost = if self.error_sensitive {
                        margin + (d as f64).sqrt()
                    } else {
                        margin + 1.0
                    };

                    delta.compute(inst, &inst.labels, &predicted, fgen);
                    let norm2 = delta.norm2();
                    // Gold and predicted paths share every feature
                    if norm2 > 0.0 {
                        let tau = self.tau(cost, norm2);
                        weights.update(&delta, tau * inst.weight);
                    }
                    loss += cost * inst.weight;
                }
                weights.tick();
            }

            session.record(loss, &current(&weights), 1.0)?;

            if loss / num_instances <= self.epsilon {
                log!(level, "Passive aggressive converged at epoch {}", epoch);
                break;
            }
        }

        Ok(current(&weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pa_type_codes() {
        for pa_type in [PaType::Pa, PaType::PaI, PaType::PaII] {
            assert_eq!(PaType::try_from(pa_type.code()).unwrap(), pa_type);
        }
        assert!(PaType::try_from(3).is_err());
    }

    #[test]
    fn test_tau() {
        let mut params = PassiveAggressiveParams::default();
        params.set_c(0.5).unwrap();
        params.set_pa_type(PaType::Pa);
        assert_eq!(params.tau(2.0, 2.0), 1.0);
        params.set_pa_type(PaType::PaI);
        assert_eq!(params.tau(2.0, 2.0), 0.5);
        params.set_pa_type(PaType::PaII);
        assert_eq!(params.tau(3.0, 2.0), 1.0);
    }

    #[test]
    fn test_params() {
        let mut params = PassiveAggressiveParams::default();
        assert!(params.set_c(0.0).is_err());
        assert!(params.set("type", ParamValue::Int(5)).is_err());
        assert_eq!(params.pa_type(), PaType::PaI);
        params.set("type", ParamValue::Int(2)).unwrap();
        assert_eq!(params.pa_type(), PaType::PaII);
        params.set("averaging", ParamValue::Bool(false)).unwrap();
        assert_eq!(params.get("averaging"), Some(ParamValue::Bool(false)));
        assert!(params.set("averaging", ParamValue::Int(1)).is_err());
    }
}
