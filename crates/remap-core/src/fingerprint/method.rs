//! Method fingerprints: the class comparison applied at method granularity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::MethodWeights;
use crate::descriptor;
use crate::fingerprint::similarity::{cosine, equality, jaccard, weighted_mean, Multiset};
use crate::models::{MethodUnit, SymbolKey};

/// Structural descriptor of one method within one build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodFingerprint {
    pub key: SymbolKey,
    /// Descriptor with classes of the same build erased to `L;`.
    pub shape: String,
    pub is_static: bool,
    pub instruction_histogram: Multiset,
    pub text_constants: BTreeSet<String>,
    /// Invoked methods whose owner is not a class of the same build.
    pub library_calls: BTreeSet<String>,
}

impl MethodFingerprint {
    /// `is_local` tells whether a class name belongs to the build being
    /// fingerprinted.
    pub fn extract<F>(key: SymbolKey, method: &MethodUnit, is_local: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let shape = descriptor::erase_classes(&method.descriptor, &is_local);
        let mut instruction_histogram = Multiset::new();
        let mut text_constants = BTreeSet::new();
        let mut library_calls = BTreeSet::new();

        if method.has_code() {
            for insn in &method.instructions {
                *instruction_histogram.entry(insn.opcode.clone()).or_insert(0) += 1;
                if let Some(text) = insn.text_constant() {
                    text_constants.insert(text.to_string());
                }
                if let Some(target) = insn.invoked() {
                    if !is_local(&target.owner) {
                        library_calls.insert(target.long_name());
                    }
                }
            }
        }

        Self {
            key,
            shape,
            is_static: method.is_static,
            instruction_histogram,
            text_constants,
            library_calls,
        }
    }

    pub fn instruction_count(&self) -> u32 {
        self.instruction_histogram.values().sum()
    }

    pub fn breakdown(&self, other: &MethodFingerprint) -> MethodBreakdown {
        MethodBreakdown {
            shape: equality(&self.shape, &other.shape),
            instructions: cosine(&self.instruction_histogram, &other.instruction_histogram),
            text_constants: jaccard(&self.text_constants, &other.text_constants),
            static_flag: equality(&self.is_static, &other.is_static),
            library_calls: jaccard(&self.library_calls, &other.library_calls),
        }
    }

    pub fn similarity(&self, other: &MethodFingerprint, weights: &MethodWeights) -> f64 {
        self.breakdown(other).score(weights)
    }
}

/// Component scores of a method comparison, each in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodBreakdown {
    pub shape: f64,
    pub instructions: f64,
    pub text_constants: f64,
    pub static_flag: f64,
    pub library_calls: f64,
}

impl MethodBreakdown {
    pub fn score(&self, weights: &MethodWeights) -> f64 {
        weighted_mean(&[
            (weights.shape, self.shape),
            (weights.instructions, self.instructions),
            (weights.text_constants, self.text_constants),
            (weights.static_flag, self.static_flag),
            (weights.library_calls, self.library_calls),
        ])
    }
}
