use log::log;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::super::crf_context::ForwardBackwardContext;
use super::super::params::{ParamSet, ParamValue};
use super::super::session::{Session, TrainingData};
use super::TrainingAlgorithm;
use crate::error::{Error, Result};

/// L2SGD training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct L2SgdParams {
    c2: f64,
    max_iterations: usize,
    period: usize,
    delta: f64,
    calibration_eta: f64,
    calibration_rate: f64,
    calibration_samples: usize,
    calibration_candidates: usize,
    calibration_max_trials: usize,
}

impl Default for L2SgdParams {
    fn default() -> Self {
        Self {
            c2: 1.0,
            max_iterations: 1000,
            period: 10,
            delta: 1e-6,
            calibration_eta: 0.1,
            calibration_rate: 2.0,
            calibration_samples: 1000,
            calibration_candidates: 10,
            calibration_max_trials: 20,
        }
    }
}

impl L2SgdParams {
    pub fn c2(&self) -> f64 {
        self.c2
    }

    /// Set the L2 coefficient, which also sets the learning rate schedule.
    pub fn set_c2(&mut self, c2: f64) -> Result<()> {
        if !(c2 > 0.0) {
            return Err(Error::invalid_input("c2 must be positive"));
        }
        self.c2 = c2;
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

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn set_period(&mut self, period: usize) -> Result<()> {
        if period == 0 {
            return Err(Error::invalid_input("period must be positive"));
        }
        self.period = period;
        Ok(())
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(delta > 0.0) {
            return Err(Error::invalid_input("delta must be positive"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn calibration_eta(&self) -> f64 {
        self.calibration_eta
    }

    pub fn set_calibration_eta(&mut self, eta: f64) -> Result<()> {
        if !(eta > 0.0) {
            return Err(Error::invalid_input("calibration.eta must be positive"));
        }
        self.calibration_eta = eta;
        Ok(())
    }

    pub fn calibration_rate(&self) -> f64 {
        self.calibration_rate
    }

    pub fn set_calibration_rate(&mut self, rate: f64) -> Result<()> {
        if !(rate > 1.0) {
            return Err(Error::invalid_input(
                "calibration.rate must be greater than 1",
            ));
        }
        self.calibration_rate = rate;
        Ok(())
    }

    pub fn calibration_samples(&self) -> usize {
        self.calibration_samples
    }

    pub fn set_calibration_samples(&mut self, samples: usize) -> Result<()> {
        if samples == 0 {
            return Err(Error::invalid_input("calibration.samples must be positive"));
        }
        self.calibration_samples = samples;
        Ok(())
    }

    pub fn calibration_candidates(&self) -> usize {
        self.calibration_candidates
    }

    pub fn set_calibration_candidates(&mut self, candidates: usize) -> Result<()> {
        if candidates == 0 {
            return Err(Error::invalid_input(
                "calibration.candidates must be positive",
            ));
        }
        self.calibration_candidates = candidates;
        Ok(())
    }

    pub fn calibration_max_trials(&self) -> usize {
        self.calibration_max_trials
    }

    pub fn set_calibration_max_trials(&mut self, max_trials: usize) -> Result<()> {
        if max_trials == 0 {
            return Err(Error::invalid_input(
                "calibration.max_trials must be positive",
            ));
        }
        self.calibration_max_trials = max_trials;
        Ok(())
    }
}

impl ParamSet for L2SgdParams {
    fn names(&self) -> &'static [&'static str] {
        &[
            "c2",
            "max_iterations",
            "period",
            "delta",
            "calibration.eta",
            "calibration.rate",
            "calibration.samples",
            "calibration.candidates",
            "calibration.max_trials",
        ]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "c2" => ParamValue::Float(self.c2),
            "max_iterations" => ParamValue::Int(self.max_iterations as i64),
            "period" => ParamValue::Int(self.period as i64),
            "delta" => ParamValue::Float(self.delta),
            "calibration.eta" => ParamValue::Float(self.calibration_eta),
            "calibration.rate" => ParamValue::Float(self.calibration_rate),
            "calibration.samples" => ParamValue::Int(self.calibration_samples as i64),
            "calibration.candidates" => ParamValue::Int(self.calibration_candidates as i64),
            "calibration.max_trials" => ParamValue::Int(self.calibration_max_trials as i64),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "c2" => self.set_c2(value.into_f64(name)?),
            "max_iterations" => self.set_max_iterations(value.into_usize(name)?),
            "period" => self.set_period(value.into_usize(name)?),
            "delta" => self.set_delta(value.into_f64(name)?),
            "calibration.eta" => self.set_calibration_eta(value.into_f64(name)?),
            "calibration.rate" => self.set_calibration_rate(value.into_f64(name)?),
            "calibration.samples" => self.set_calibration_samples(value.into_usize(name)?),
            "calibration.candidates" => self.set_calibration_candidates(value.into_usize(name)?),
            "calibration.max_trials" => self.set_calibration_max_trials(value.into_usize(name)?),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

/// Stochastic gradient descent over a fixed set of instances.
///
/// Weights are kept as `decay * w` so the L2 shrinkage of every step
/// costs O(1) instead of O(#features).
struct Sgd<'a> {
    data: TrainingData<'a>,
    ctx: ForwardBackwardContext,
    lambda: f64,
}

impl<'a> Sgd<'a> {
    fn new(data: TrainingData<'a>, lambda: f64) -> Self {
        Self {
            data,
            ctx: ForwardBackwardContext::new(data.num_labels, data.max_items),
            lambda,
        }
    }

    /// Loss of `w` over `indices`, without the regularization term
    fn loss(&mut self, w: &[f64], indices: &[usize]) -> f64 {
        let fgen = self.data.fgen;
        self.ctx.transition_score(fgen, w, 1.0);
        let mut loss = 0.0;
        for &i in indices {
            let inst = self.data.instances[i];
            self.ctx.state_score(inst, fgen, w, 1.0);
            self.ctx.forward_backward();
            loss -= self.ctx.log_likelihood(inst) * inst.weight;
        }
        loss
    }

    /// Run one epoch over `indices` starting at step `t`.
    ///
    /// Returns the regularized loss accumulated during the epoch.
    fn epoch(&mut self, w: &mut [f64], indices: &[usize], t0: f64, t: &mut f64) -> f64 {
        let fgen = self.data.fgen;
        let lambda = self.lambda;
        let mut decay = 1.0;
        let mut loss = 0.0;

        for &i in indices {
            let inst = self.data.instances[i];
            let eta = 1.0 / (lambda * (t0 + *t));
            decay *= 1.0 - eta * lambda;
            let gain = eta / decay;

            self.ctx.transition_score(fgen, w, decay);
            self.ctx.state_score(inst, fgen, w, decay);
            self.ctx.forward_backward();
            loss -= self.ctx.log_likelihood(inst) * inst.weight;
            // w -= gain * (expected - observed)
            self.ctx.accumulate_gradient(inst, fgen, w, -gain * inst.weight);
            *t += 1.0;

            // Fold the decay back in before it underflows
            if decay < 1e-9 {
                rescale(w, decay);
                decay = 1.0;
            }
        }
        rescale(w, decay);

        let norm2: f64 = w.iter().map(|v| v * v).sum();
        loss + 0.5 * lambda * norm2 * indices.len() as f64
    }
}

fn rescale(w: &mut [f64], scale: f64) {
    for v in w {
        *v *= scale;
    }
}

impl L2SgdParams {
    /// Search for the initial learning rate on a sample of the data.
    ///
    /// Returns the offset `t0` such that the first step uses the
    /// calibrated rate.
    fn calibrate(&self, sgd: &mut Sgd<'_>, rng: &mut StdRng, session: &Session<'_>) -> f64 {
        let level = session.level();
        let num_features = sgd.data.num_features();
        let lambda = sgd.lambda;

        let mut samples: Vec<usize> = (0..sgd.data.num_instances()).collect();
        samples.shuffle(rng);
        samples.truncate(self.calibration_samples);

        let mut weights = vec![0.0; num_features];
        let initial_loss = sgd.loss(&weights, &samples);
        log!(level, "Calibrating the learning rate (eta)");
        log!(level, "Initial loss: {:.6}", initial_loss);

        let mut eta = self.calibration_eta;
        let mut best_eta = eta;
        let mut best_loss = f64::INFINITY;
        let mut dec = false;
        let mut num = self.calibration_candidates;
        let mut trials = 1;

        while num > 0 || !dec {
            weights.fill(0.0);
            let mut t = 0.0;
            let loss = sgd.epoch(&mut weights, &samples, 1.0 / (lambda * eta), &mut t);
            let ok = loss.is_finite() && loss < initial_loss;
            log!(
                level,
                "Trial #{} (eta = {:.6}): loss = {:.6}{}",
                trials,
                eta,
                loss,
                if ok { "" } else { " (worse)" }
            );

            if ok {
                num = num.saturating_sub(1);
                if loss < best_loss {
                    best_loss = loss;
                    best_eta = eta;
                }
            }

            if !dec {
                if ok && num > 0 {
                    eta *= self.calibration_rate;
                } else {
                    dec = true;
                    num = self.calibration_candidates;
                    eta = self.calibration_eta / self.calibration_rate;
                }
            } else {
                eta /= self.calibration_rate;
            }

            trials += 1;
            if self.calibration_max_trials <= trials {
                break;
            }
        }

        log!(level, "Best learning rate (eta): {:.6}", best_eta);
        1.0 / (lambda * best_eta)
    }
}

impl TrainingAlgorithm for L2SgdParams {
    fn train(&self, session: &mut Session<'_>) -> Result<Vec<f64>> {
        let data = session.data;
        let level = session.level();
        let num_features = data.num_features();
        let num_instances = data.num_instances();
        let lambda = 2.0 * self.c2 / num_instances as f64;

        let mut sgd = Sgd::new(data, lambda);
        let mut rng = session.rng();
        let t0 = self.calibrate(&mut sgd, &mut rng, session);

        let mut weights = vec![0.0; num_features];
        let mut best_weights = weights.clone();
        let mut best_loss = f64::INFINITY;
        let mut history = vec![0.0; self.period];
        let mut indices: Vec<usize> = (0..num_instances).collect();
        let mut t = 0.0;

        for epoch in 1..=self.max_iterations {
            session.check_cancelled()?;
            indices.shuffle(&mut rng);

            let loss = sgd.epoch(&mut weights, &indices, t0, &mut t);
            session.record(loss, &weights, 1.0)?;

            if loss < best_loss {
                best_loss = loss;
                best_weights.copy_from_slice(&weights);
            }

            // Relative improvement over `period` epochs ago
            let slot = (epoch - 1) % self.period;
            if epoch > self.period {
                let improvement = (history[slot] - loss) / loss;
                log!(level, "Improvement ratio: {:.6}", improvement);
                if improvement < self.delta {
                    log!(level, "L2SGD converged at epoch {}", epoch);
                    break;
                }
            }
            history[slot] = loss;
        }

        log!(level, "Loss of the best epoch: {:.6}", best_loss);
        Ok(best_weights)
    }
}
