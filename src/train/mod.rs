//! Training of linear-chain CRF models
//!
//! A [`Trainer`] collects labeled sequences, generates the feature set and
//! runs one of the five training algorithms. The trained weights are pruned
//! of zero-weight features and stored in the same model layout that
//! [`Model`](crate::Model) reads.

mod crf_context;
mod evaluation;
mod feature_gen;
mod params;
mod pruning;
mod session;
mod trainer;

// Re-export public types
pub use self::evaluation::{HoldoutStats, LabelScore};
pub use self::feature_gen::FeatureParams;
pub use self::params::{ParamType, ParamValue};
pub use self::session::{IterationStats, TrainingSummary};
pub use self::trainer::{
    Algorithm, AlgorithmParams, ArowParams, AveragedPerceptronParams, L2SgdParams, LbfgsParams,
    LineSearchAlgorithm, PaType, PassiveAggressiveParams, Trainer,
};
