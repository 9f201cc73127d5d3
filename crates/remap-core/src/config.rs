//! Tunable matching policy.
//!
//! Defaults reproduce the weight table scores are calibrated against.
//! Environment variables (`REMAP_TOP_K`, `REMAP_MAX_ROUNDS`,
//! `REMAP_NEIGHBOR_WEIGHT`, `REMAP_CLASS_WEIGHT`, `REMAP_WORKERS`) override
//! the scalar knobs; weight tables only come from serialized config.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{RemapError, RemapResult};
use crate::guards::{self, is_unit_interval};

// ---------------------------------------------------------------------------
// Weight tables
// ---------------------------------------------------------------------------

/// Component weights of the class similarity function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassWeights {
    pub classification: f64,
    pub hierarchy: f64,
    pub signatures: f64,
    pub instructions: f64,
    pub text_constants: f64,
    pub static_signatures: f64,
    pub field_types: f64,
    pub constructors: f64,
    pub static_initializer: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self {
            classification: 1.0,
            hierarchy: 1.0,
            signatures: 2.0,
            instructions: 2.0,
            text_constants: 1.5,
            static_signatures: 1.0,
            field_types: 1.0,
            constructors: 0.5,
            static_initializer: 0.2,
        }
    }
}

impl ClassWeights {
    fn values(&self) -> [(&'static str, f64); 9] {
        [
            ("classification", self.classification),
            ("hierarchy", self.hierarchy),
            ("signatures", self.signatures),
            ("instructions", self.instructions),
            ("text_constants", self.text_constants),
            ("static_signatures", self.static_signatures),
            ("field_types", self.field_types),
            ("constructors", self.constructors),
            ("static_initializer", self.static_initializer),
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().map(|(_, w)| w).sum()
    }
}

/// Component weights of the method similarity function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodWeights {
    pub shape: f64,
    pub instructions: f64,
    pub text_constants: f64,
    pub static_flag: f64,
    pub library_calls: f64,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            shape: 2.0,
            instructions: 2.0,
            text_constants: 1.5,
            static_flag: 1.0,
            library_calls: 1.0,
        }
    }
}

impl MethodWeights {
    fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("shape", self.shape),
            ("instructions", self.instructions),
            ("text_constants", self.text_constants),
            ("static_flag", self.static_flag),
            ("library_calls", self.library_calls),
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().map(|(_, w)| w).sum()
    }
}

/// Component weights of the field similarity function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub descriptor: f64,
    pub modifiers: f64,
    pub usage: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            descriptor: 5.0,
            modifiers: 1.0,
            usage: 4.0,
        }
    }
}

impl FieldWeights {
    fn values(&self) -> [(&'static str, f64); 3] {
        [
            ("descriptor", self.descriptor),
            ("modifiers", self.modifiers),
            ("usage", self.usage),
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().map(|(_, w)| w).sum()
    }
}

fn validate_weights(table: &str, values: &[(&'static str, f64)]) -> RemapResult<()> {
    for (name, weight) in values {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(RemapError::InvalidConfig(format!(
                "{table}.{name} must be a finite non-negative number, got {weight}"
            )));
        }
    }
    if values.iter().all(|(_, w)| *w == 0.0) {
        return Err(RemapError::InvalidConfig(format!(
            "{table} must contain at least one positive weight"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RemapConfig
// ---------------------------------------------------------------------------

/// Complete configuration of one pairwise build comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapConfig {
    /// Candidates kept per old method.
    pub top_k: usize,
    /// Refinement round budget.
    pub max_rounds: usize,
    /// Share of the combined score taken by call-graph agreement, in `[0, 1]`.
    pub neighbor_weight: f64,
    /// Boost applied when a candidate's owner is the matched class, in `[0, 1]`.
    pub class_weight: f64,
    /// Class matches below this similarity are not used as context.
    pub min_class_similarity: f64,
    pub require_compatible_descriptors: bool,
    /// Worker threads; `0` lets rayon pick.
    pub workers: usize,
    /// Field pairs below this score are not reported.
    pub min_field_score: f64,
    pub class_weights: ClassWeights,
    pub method_weights: MethodWeights,
    pub field_weights: FieldWeights,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            top_k: guards::DEFAULT_TOP_K,
            max_rounds: guards::DEFAULT_MAX_ROUNDS,
            neighbor_weight: 0.3,
            class_weight: 0.5,
            min_class_similarity: 0.3,
            require_compatible_descriptors: true,
            workers: 0,
            min_field_score: 0.25,
            class_weights: ClassWeights::default(),
            method_weights: MethodWeights::default(),
            field_weights: FieldWeights::default(),
        }
    }
}

impl RemapConfig {
    /// Defaults overlaid with `REMAP_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.overlay(|name| std::env::var(name).ok());
        config
    }

    /// Apply overrides from an arbitrary variable lookup. Values that do not
    /// parse are skipped.
    pub fn overlay<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "REMAP_TOP_K") {
            self.top_k = v;
        }
        if let Some(v) = parse_var(&lookup, "REMAP_MAX_ROUNDS") {
            self.max_rounds = v;
        }
        if let Some(v) = parse_var(&lookup, "REMAP_NEIGHBOR_WEIGHT") {
            self.neighbor_weight = v;
        }
        if let Some(v) = parse_var(&lookup, "REMAP_CLASS_WEIGHT") {
            self.class_weight = v;
        }
        if let Some(v) = parse_var(&lookup, "REMAP_WORKERS") {
            self.workers = v;
        }
    }

    /// Reject configurations no computation should start with.
    pub fn validate(&self) -> RemapResult<()> {
        if !is_unit_interval(self.neighbor_weight) {
            return Err(RemapError::InvalidConfig(format!(
                "neighbor_weight must be in [0,1], got {}",
                self.neighbor_weight
            )));
        }
        if !is_unit_interval(self.class_weight) {
            return Err(RemapError::InvalidConfig(format!(
                "class_weight must be in [0,1], got {}",
                self.class_weight
            )));
        }
        if !is_unit_interval(self.min_class_similarity) {
            return Err(RemapError::InvalidConfig(format!(
                "min_class_similarity must be in [0,1], got {}",
                self.min_class_similarity
            )));
        }
        if !is_unit_interval(self.min_field_score) {
            return Err(RemapError::InvalidConfig(format!(
                "min_field_score must be in [0,1], got {}",
                self.min_field_score
            )));
        }
        validate_weights("class_weights", &self.class_weights.values())?;
        validate_weights("method_weights", &self.method_weights.values())?;
        validate_weights("field_weights", &self.field_weights.values())?;
        Ok(())
    }

    pub fn effective_top_k(&self) -> usize {
        clamped("top_k", self.top_k, guards::clamp_top_k(self.top_k))
    }

    pub fn effective_max_rounds(&self) -> usize {
        clamped(
            "max_rounds",
            self.max_rounds,
            guards::clamp_rounds(self.max_rounds),
        )
    }

    pub fn effective_workers(&self) -> usize {
        clamped("workers", self.workers, guards::clamp_workers(self.workers))
    }
}

fn clamped(name: &str, requested: usize, effective: usize) -> usize {
    if requested != effective {
        warn!("Clamping {name} from {requested} to {effective}");
    }
    effective
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {name}={raw:?}");
            None
        }
    }
}
