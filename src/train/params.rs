//! Parameter registry
//!
//! Every algorithm keeps its hyperparameters in a typed struct. The string
//! interface of [`Trainer::get`](super::Trainer::get) and
//! [`Trainer::set`](super::Trainer::set) goes through the fixed table below,
//! which assigns each name a [`ParamType`] and a help text.

use std::fmt;

use crate::error::{Error, Result};

/// Semantic type of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Float,
    Int,
    Bool,
    Str,
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl ParamValue {
    /// Parse a string into a value of the given type.
    pub fn parse(ty: ParamType, name: &str, value: &str) -> Result<Self> {
        let invalid = || {
            Error::invalid_input(format!("invalid value for {}: {:?}", name, value))
        };
        let value = value.trim();
        match ty {
            // "-0" is stored as 0
            ParamType::Float => value
                .parse::<f64>()
                .map(|v| Self::Float(v + 0.0))
                .map_err(|_| invalid()),
            ParamType::Int => value.parse().map(Self::Int).map_err(|_| invalid()),
            ParamType::Bool => match value {
                "1" | "true" => Ok(Self::Bool(true)),
                "0" | "false" => Ok(Self::Bool(false)),
                _ => Err(Error::invalid_input(format!(
                    "{} must be 0 or 1, got {:?}",
                    name, value
                ))),
            },
            ParamType::Str => Ok(Self::Str(value.to_string())),
        }
    }

    pub(crate) fn into_f64(self, name: &str) -> Result<f64> {
        match self {
            Self::Float(v) => Ok(v),
            Self::Int(v) => Ok(v as f64),
            other => Err(mismatch(name, "a float", &other)),
        }
    }

    pub(crate) fn into_usize(self, name: &str) -> Result<usize> {
        match self {
            Self::Int(v) => usize::try_from(v)
                .map_err(|_| Error::invalid_input(format!("{} must be non-negative", name))),
            other => Err(mismatch(name, "an integer", &other)),
        }
    }

    pub(crate) fn into_i64(self, name: &str) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(v),
            other => Err(mismatch(name, "an integer", &other)),
        }
    }

    pub(crate) fn into_bool(self, name: &str) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(mismatch(name, "a boolean", &other)),
        }
    }

    pub(crate) fn into_string(self, name: &str) -> Result<String> {
        match self {
            Self::Str(v) => Ok(v),
            other => Err(mismatch(name, "a string", &other)),
        }
    }
}

fn mismatch(name: &str, expected: &str, got: &ParamValue) -> Error {
    Error::invalid_input(format!("{} expects {}, got {}", name, expected, got))
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Typed access to a group of parameters by name.
pub(crate) trait ParamSet {
    /// Names this group answers to, in display order
    fn names(&self) -> &'static [&'static str];

    fn get(&self, name: &str) -> Option<ParamValue>;

    /// Store a value, running the same validation as the typed setters.
    fn set(&mut self, name: &str, value: ParamValue) -> Result<()>;
}

/// Registry entry
#[derive(Debug)]
pub(crate) struct ParamDef {
    pub name: &'static str,
    pub ty: ParamType,
    pub help: &'static str,
}

const fn param(name: &'static str, ty: ParamType, help: &'static str) -> ParamDef {
    ParamDef { name, ty, help }
}

static REGISTRY: &[ParamDef] = &[
    param(
        "feature.minfreq",
        ParamType::Float,
        "The minimum frequency of features.",
    ),
    param(
        "feature.possible_states",
        ParamType::Bool,
        "Force to generate possible state features.",
    ),
    param(
        "feature.possible_transitions",
        ParamType::Bool,
        "Force to generate possible transition features.",
    ),
    param("c1", ParamType::Float, "Coefficient for L1 regularization."),
    param("c2", ParamType::Float, "Coefficient for L2 regularization."),
    param(
        "num_memories",
        ParamType::Int,
        "The number of limited memories for approximating the inverse hessian matrix.",
    ),
    param(
        "max_iterations",
        ParamType::Int,
        "The maximum number of iterations (epochs) for the optimization.",
    ),
    param(
        "epsilon",
        ParamType::Float,
        "Epsilon for testing the convergence of the objective.",
    ),
    param(
        "period",
        ParamType::Int,
        "The duration of iterations to test the stopping criterion.",
    ),
    param(
        "delta",
        ParamType::Float,
        "The threshold for the stopping criterion; an iteration stops when the improvement \
         of the log likelihood over the last ${period} iterations is no greater than this threshold.",
    ),
    param(
        "linesearch",
        ParamType::Str,
        "The line search algorithm used in L-BFGS updates: { 'MoreThuente': More and Thuente's \
         method, 'Backtracking': backtracking method with regular Wolfe condition, \
         'StrongBacktracking': backtracking method with strong Wolfe condition, \
         'BacktrackingArmijo': backtracking method with Armijo condition }",
    ),
    param(
        "max_linesearch",
        ParamType::Int,
        "The maximum number of trials for the line search algorithm.",
    ),
    param(
        "calibration.eta",
        ParamType::Float,
        "The initial value of learning rate (eta) used for calibration.",
    ),
    param(
        "calibration.rate",
        ParamType::Float,
        "The rate of increase/decrease of learning rate for calibration.",
    ),
    param(
        "calibration.samples",
        ParamType::Int,
        "The number of instances used for calibration.",
    ),
    param(
        "calibration.candidates",
        ParamType::Int,
        "The number of candidates of learning rate.",
    ),
    param(
        "calibration.max_trials",
        ParamType::Int,
        "The maximum number of trials of learning rates for calibration.",
    ),
    param(
        "type",
        ParamType::Int,
        "The strategy for updating feature weights: { 0: PA without slack variables, \
         1: PA type I, 2: PA type II }.",
    ),
    param("c", ParamType::Float, "The aggressiveness parameter."),
    param(
        "error_sensitive",
        ParamType::Bool,
        "Consider the number of incorrect labels to the cost function.",
    ),
    param(
        "averaging",
        ParamType::Bool,
        "Compute the average of feature weights (similarly to Averaged Perceptron).",
    ),
    param(
        "variance",
        ParamType::Float,
        "The initial variance of every feature weight.",
    ),
    param(
        "gamma",
        ParamType::Float,
        "Tradeoff parameter.",
    ),
];

/// Look up a parameter by name
pub(crate) fn lookup(name: &str) -> Option<&'static ParamDef> {
    REGISTRY.iter().find(|def| def.name == name)
}
