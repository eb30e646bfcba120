//! Tunable parameter domains and values.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A concrete parameter value (sampled from a domain or proposed by the
/// search engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    /// Ordered list, as produced by permutation parameters.
    StrList(Vec<String>),
    /// Selection parameters choose an ordered prefix: the first `size`
    /// entries of `order` are active.
    Selection { order: Vec<String>, size: usize },
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A parameter-name to value mapping, used for stored optimal
/// configurations and compiler-input entries.
pub type ParamAssignment = BTreeMap<String, ParamValue>;

/// Parameter domain (per-parameter search space).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamDomain {
    /// Two-option toggle. Seeded/encoded as the strings "1"/"0" so stored
    /// configurations stay compatible with the compiler-facing writers.
    Bool,
    Enum(Vec<String>),
    IntRange { min: i64, max: i64 },
    FloatRange { min: f64, max: f64 },
    Permutation(Vec<String>),
    Selection(Vec<String>),
}

impl ParamDomain {
    /// Draw a seed value from this domain. Used when no stored
    /// configuration covers a parameter.
    pub fn seed_value<R: Rng>(&self, rng: &mut R) -> ParamValue {
        match self {
            ParamDomain::Bool => {
                let on = rng.random::<f64>() < 0.5;
                ParamValue::Str(if on { "1" } else { "0" }.to_string())
            }
            ParamDomain::Enum(options) => {
                let idx = (rng.random::<f64>() * options.len() as f64).floor() as usize;
                let idx = idx.min(options.len().saturating_sub(1));
                ParamValue::Str(options[idx].clone())
            }
            ParamDomain::IntRange { min, max } => {
                let range = (*max - *min + 1) as f64;
                let offset = (rng.random::<f64>() * range).floor() as i64;
                ParamValue::Int((*min + offset).min(*max))
            }
            ParamDomain::FloatRange { min, max } => {
                ParamValue::Float(min + rng.random::<f64>() * (max - min))
            }
            ParamDomain::Permutation(options) => {
                let mut order = options.clone();
                order.shuffle(rng);
                ParamValue::StrList(order)
            }
            ParamDomain::Selection(options) => {
                let mut order = options.clone();
                order.shuffle(rng);
                let size = if order.is_empty() {
                    0
                } else {
                    1 + (rng.random::<f64>() * order.len() as f64).floor() as usize % order.len()
                };
                ParamValue::Selection { order, size }
            }
        }
    }

    /// Check whether a value can have come from this domain.
    pub fn is_valid(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamDomain::Bool, ParamValue::Str(s)) => s == "1" || s == "0",
            (ParamDomain::Enum(options), ParamValue::Str(s)) => options.contains(s),
            (ParamDomain::IntRange { min, max }, ParamValue::Int(v)) => v >= min && v <= max,
            (ParamDomain::FloatRange { min, max }, ParamValue::Float(v)) => v >= min && v <= max,
            (ParamDomain::Permutation(options), ParamValue::StrList(order)) => {
                order.len() == options.len() && order.iter().all(|o| options.contains(o))
            }
            (ParamDomain::Selection(options), ParamValue::Selection { order, size }) => {
                *size <= order.len() && order.iter().all(|o| options.contains(o))
            }
            _ => false,
        }
    }
}

/// One tunable parameter of a task. The engine-visible `name` is the raw
/// field name prefixed with the owning task's tuning id, so parameters
/// from different tasks never collide in the engine's flat namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableParam {
    /// Flattened engine-facing name, `<tuning_id><field>`.
    pub name: String,
    /// Raw field name as the compiler knows it, e.g. `UnrollCount`.
    pub field: String,
    pub domain: ParamDomain,
}

impl TunableParam {
    pub fn new(tuning_id: u32, field: impl Into<String>, domain: ParamDomain) -> Self {
        let field = field.into();
        Self { name: format!("{tuning_id}{field}"), field, domain }
    }
}
