use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use log::log;

use super::feature_gen::{FeatureGenerator, FeatureParams};
use super::params::{self, ParamSet, ParamValue};
use super::pruning::PrunedModel;
use super::session::{Session, TrainingData, TrainingSummary};
use crate::alphabet::Alphabet;
use crate::attribute::Attribute;
use crate::dataset::{self, Instance, Item};
use crate::error::{Error, Result};
use crate::model::{Metadata, Model};
use crate::model_writer::{persist_atomic, ModelWriter};

mod arow;
mod averaged_perceptron;
mod l2sgd;
mod lbfgs;
mod passive_aggressive;

pub use self::arow::ArowParams;
pub use self::averaged_perceptron::AveragedPerceptronParams;
pub use self::l2sgd::L2SgdParams;
pub use self::lbfgs::{LbfgsParams, LineSearchAlgorithm};
pub use self::passive_aggressive::{PaType, PassiveAggressiveParams};

/// Training algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Gradient descent using the L-BFGS method
    Lbfgs,
    /// Stochastic gradient descent with L2 regularization
    L2Sgd,
    /// Averaged perceptron
    AveragedPerceptron,
    /// Passive aggressive
    PassiveAggressive,
    /// Adaptive regularization of weight vector
    Arow,
}

impl Algorithm {
    /// Short name, as stored in model metadata
    pub fn name(self) -> &'static str {
        match self {
            Self::Lbfgs => "lbfgs",
            Self::L2Sgd => "l2sgd",
            Self::AveragedPerceptron => "ap",
            Self::PassiveAggressive => "pa",
            Self::Arow => "arow",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lbfgs" => Ok(Self::Lbfgs),
            "l2sgd" => Ok(Self::L2Sgd),
            "ap" | "averaged-perceptron" => Ok(Self::AveragedPerceptron),
            "pa" | "passive-aggressive" => Ok(Self::PassiveAggressive),
            "arow" => Ok(Self::Arow),
            _ => Err(Error::invalid_input(format!(
                "unknown training algorithm: {}",
                s
            ))),
        }
    }
}

impl TryFrom<&str> for Algorithm {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

/// Parameters of the selected algorithm
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmParams {
    Lbfgs(LbfgsParams),
    L2Sgd(L2SgdParams),
    AveragedPerceptron(AveragedPerceptronParams),
    PassiveAggressive(PassiveAggressiveParams),
    Arow(ArowParams),
}

impl AlgorithmParams {
    /// Default parameters of an algorithm
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Lbfgs => Self::Lbfgs(LbfgsParams::default()),
            Algorithm::L2Sgd => Self::L2Sgd(L2SgdParams::default()),
            Algorithm::AveragedPerceptron => {
                Self::AveragedPerceptron(AveragedPerceptronParams::default())
            }
            Algorithm::PassiveAggressive => {
                Self::PassiveAggressive(PassiveAggressiveParams::default())
            }
            Algorithm::Arow => Self::Arow(ArowParams::default()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Lbfgs(_) => Algorithm::Lbfgs,
            Self::L2Sgd(_) => Algorithm::L2Sgd,
            Self::AveragedPerceptron(_) => Algorithm::AveragedPerceptron,
            Self::PassiveAggressive(_) => Algorithm::PassiveAggressive,
            Self::Arow(_) => Algorithm::Arow,
        }
    }

    fn param_set(&self) -> &dyn ParamSet {
        match self {
            Self::Lbfgs(p) => p,
            Self::L2Sgd(p) => p,
            Self::AveragedPerceptron(p) => p,
            Self::PassiveAggressive(p) => p,
            Self::Arow(p) => p,
        }
    }

    fn param_set_mut(&mut self) -> &mut dyn ParamSet {
        match self {
            Self::Lbfgs(p) => p,
            Self::L2Sgd(p) => p,
            Self::AveragedPerceptron(p) => p,
            Self::PassiveAggressive(p) => p,
            Self::Arow(p) => p,
        }
    }

    fn algorithm_impl(&self) -> &dyn TrainingAlgorithm {
        match self {
            Self::Lbfgs(p) => p,
            Self::L2Sgd(p) => p,
            Self::AveragedPerceptron(p) => p,
            Self::PassiveAggressive(p) => p,
            Self::Arow(p) => p,
        }
    }
}

/// Training algorithm interface.
///
/// Implemented by each parameter struct; returns the trained weight vector.
pub(crate) trait TrainingAlgorithm {
    fn train(&self, session: &mut Session<'_>) -> Result<Vec<f64>>;
}

/// CRF Trainer
#[derive(Debug)]
pub struct Trainer {
    /// Training instances
    instances: Vec<Instance>,
    /// Attribute dictionary
    attrs: Alphabet,
    /// Label dictionary
    labels: Alphabet,
    /// Feature generation parameters
    feature_params: FeatureParams,
    /// Parameters of the selected algorithm
    params: AlgorithmParams,
    /// Enable verbose output
    verbose: bool,
    /// Seed for shuffling instances
    seed: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Trainer {
    /// Create a new trainer using L-BFGS
    ///
    /// A verbose trainer logs its progress at `Info` level instead of `Debug`.
    pub fn new(verbose: bool) -> Self {
        Self {
            instances: Vec::new(),
            attrs: Alphabet::new(),
            labels: Alphabet::new(),
            feature_params: FeatureParams::default(),
            params: AlgorithmParams::new(Algorithm::Lbfgs),
            verbose,
            seed: 0,
            cancel: None,
        }
    }

    /// Enable or disable verbose output
    pub fn verbose(&mut self, enabled: bool) -> &mut Self {
        self.verbose = enabled;
        self
    }

    /// Select the training algorithm, by [`Algorithm`] or by name.
    ///
    /// The parameters of the algorithm are reset to their defaults; feature
    /// parameters are kept.
    pub fn select<A>(&mut self, algorithm: A) -> Result<()>
    where
        A: TryInto<Algorithm>,
        Error: From<A::Error>,
    {
        let algorithm = algorithm.try_into()?;
        self.params = AlgorithmParams::new(algorithm);
        Ok(())
    }

    /// The selected algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.params.algorithm()
    }

    pub fn algorithm_params(&self) -> &AlgorithmParams {
        &self.params
    }

    pub fn algorithm_params_mut(&mut self) -> &mut AlgorithmParams {
        &mut self.params
    }

    pub fn feature_params(&self) -> &FeatureParams {
        &self.feature_params
    }

    pub fn feature_params_mut(&mut self) -> &mut FeatureParams {
        &mut self.feature_params
    }

    /// Seed of the instance shuffling used by the online algorithms
    pub fn set_shuffle_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Install a flag that stops training when set.
    ///
    /// The flag is checked between iterations.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Attributes seen so far
    pub fn attributes(&self) -> &Alphabet {
        &self.attrs
    }

    /// Labels seen so far
    pub fn labels(&self) -> &Alphabet {
        &self.labels
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Append a training instance
    pub fn append<I, L>(&mut self, xseq: &[I], yseq: &[L], group: i32) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        self.append_weighted(xseq, yseq, group, 1.0)
    }

    /// Append a weighted training instance
    ///
    /// The instance is validated before anything is interned, so a rejected
    /// instance leaves the trainer unchanged.
    pub fn append_weighted<I, L>(
        &mut self,
        xseq: &[I],
        yseq: &[L],
        group: i32,
        weight: f64,
    ) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(Error::invalid_input(format!(
                "the number of items ({}) does not match the number of labels ({})",
                xseq.len(),
                yseq.len()
            )));
        }
        if xseq.is_empty() {
            return Err(Error::invalid_input("empty sequences are not allowed"));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::invalid_input(format!(
                "instance weight must be finite and non-negative, got {}",
                weight
            )));
        }
        for (item, label) in xseq.iter().zip(yseq) {
            for attr in item.as_ref() {
                attr.validate()?;
            }
            if label.as_ref().contains('\0') {
                return Err(Error::invalid_input(format!(
                    "label {:?} contains a NUL byte",
                    label.as_ref()
                )));
            }
        }

        let mut instance = Instance::with_capacity(xseq.len());
        instance.weight = weight;
        instance.group = group;
        for (item, label) in xseq.iter().zip(yseq) {
            let mut attrs = Item::new();
            for attr in item.as_ref() {
                let aid = self.attrs.get_or_insert(&attr.name);
                dataset::accumulate(&mut attrs, aid, attr.value);
            }
            let lid = self.labels.get_or_insert(label.as_ref());
            instance.push(attrs, lid);
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Clear all training data
    pub fn clear(&mut self) {
        self.instances.clear();
        self.attrs.clear();
        self.labels.clear();
    }

    /// Names of the parameters of the selected algorithm, feature parameters first
    pub fn params(&self) -> Vec<&'static str> {
        let mut names = self.feature_params.names().to_vec();
        names.extend_from_slice(self.params.param_set().names());
        names
    }

    /// Set a parameter from its string form
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let def = self.lookup(name)?;
        let value = ParamValue::parse(def.ty, name, value)?;
        if self.feature_params.names().contains(&name) {
            self.feature_params.set(name, value)
        } else {
            self.params.param_set_mut().set(name, value)
        }
    }

    /// Get the string form of a parameter value
    pub fn get(&self, name: &str) -> Result<String> {
        self.lookup(name)?;
        self.feature_params
            .get(name)
            .or_else(|| self.params.param_set().get(name))
            .map(|value| value.to_string())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Describe a parameter
    pub fn help(&self, name: &str) -> Result<&'static str> {
        params::lookup(name)
            .map(|def| def.help)
            .ok_or_else(|| Error::invalid_input(format!("unknown parameter: {}", name)))
    }

    /// Resolve a name that must apply to the selected algorithm
    fn lookup(&self, name: &str) -> Result<&'static params::ParamDef> {
        let def = params::lookup(name)
            .ok_or_else(|| Error::invalid_input(format!("unknown parameter: {}", name)))?;
        if !self.params().contains(&name) {
            return Err(Error::NotFound(format!(
                "{} is not a parameter of {}",
                name,
                self.algorithm()
            )));
        }
        Ok(def)
    }

    /// Algorithm name and parameter values, stored with the model
    fn metadata(&self) -> Metadata {
        let params = self
            .params()
            .into_iter()
            .filter_map(|name| {
                let value = self.get(name).ok()?;
                Some((name.to_string(), value))
            })
            .collect();
        Metadata {
            algorithm: Some(self.algorithm().name().to_string()),
            params,
        }
    }

    /// Train a model and store it at `path`.
    ///
    /// Instances whose group equals `holdout` are excluded from training and
    /// used for evaluation; a negative `holdout` uses every instance. The file
    /// is only written if training succeeds.
    pub fn train<P: AsRef<Path>>(&self, path: P, holdout: i32) -> Result<TrainingSummary> {
        let path = path.as_ref();
        let (bytes, summary) = self.fit(holdout)?;
        log!(self.level(), "Storing the model to {}", path.display());
        persist_atomic(path, &bytes)?;
        Ok(summary)
    }

    /// Train a model and return it without touching the filesystem
    pub fn train_model(&self, holdout: i32) -> Result<(Model, TrainingSummary)> {
        let (bytes, summary) = self.fit(holdout)?;
        Ok((Model::from_bytes(&bytes)?, summary))
    }

    fn level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    fn fit(&self, holdout: i32) -> Result<(Vec<u8>, TrainingSummary)> {
        if self.instances.is_empty() {
            return Err(Error::invalid_input("no training data"));
        }
        let start = Instant::now();
        let level = self.level();

        let (train, evaluation): (Vec<&Instance>, Vec<&Instance>) = self
            .instances
            .iter()
            .partition(|inst| holdout < 0 || inst.group != holdout);
        if train.is_empty() {
            return Err(Error::invalid_input(format!(
                "every instance belongs to the holdout group {}",
                holdout
            )));
        }

        log!(level, "Feature generation");
        log!(level, "type: CRF1d");
        log!(level, "feature.minfreq: {}", self.feature_params.minfreq());
        log!(
            level,
            "feature.possible_states: {}",
            self.feature_params.possible_states() as u8
        );
        log!(
            level,
            "feature.possible_transitions: {}",
            self.feature_params.possible_transitions() as u8
        );
        let mut fgen = FeatureGenerator::generate(
            &train,
            self.attrs.len(),
            self.labels.len(),
            &self.feature_params,
        )?;
        log!(level, "Number of features: {}", fgen.num_features());
        log!(level, "Number of labels: {}", self.labels.len());
        log!(level, "Number of attributes: {}", self.attrs.len());
        log!(
            level,
            "Number of instances: {} (holdout: {})",
            train.len(),
            evaluation.len()
        );

        let max_items = self.instances.iter().map(Instance::len).max().unwrap_or(0);
        let data = TrainingData {
            instances: &train,
            fgen: &fgen,
            num_labels: self.labels.len(),
            max_items,
        };
        let cancel = self.cancel.as_deref();
        let mut session = Session::new(data, &evaluation, &self.labels, self.verbose, self.seed, cancel);

        log!(level, "Start training with {}", self.algorithm());
        for name in self.params.param_set().names() {
            if let Some(value) = self.params.param_set().get(name) {
                log!(level, "{}: {}", name, value);
            }
        }
        let weights = if data.num_features() == 0 {
            log!(level, "No features to train");
            Vec::new()
        } else {
            self.params.algorithm_impl().train(&mut session)?
        };
        let iterations = session.into_iterations();
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::training("training produced non-finite feature weights"));
        }

        fgen.set_weights(&weights);
        let pruned = PrunedModel::from_fgen(&fgen, &self.attrs);
        log!(
            level,
            "Number of active features: {} ({})",
            pruned.num_features(),
            fgen.num_features()
        );
        log!(
            level,
            "Number of active attributes: {} ({})",
            pruned.num_attrs(),
            self.attrs.len()
        );

        let metadata = self.metadata();
        let bytes = ModelWriter::to_bytes(&pruned.parts(&self.labels, &metadata))?;
        let elapsed = start.elapsed();
        log!(level, "Seconds required: {:.3}", elapsed.as_secs_f64());

        let summary = TrainingSummary {
            algorithm: self.algorithm(),
            num_features: pruned.num_features(),
            num_labels: self.labels.len(),
            num_attributes: pruned.num_attrs(),
            iterations,
            elapsed,
        };
        Ok((bytes, summary))
    }
}
