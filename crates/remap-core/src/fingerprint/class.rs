//! Class fingerprints: a name-independent structural summary of one class.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::ClassWeights;
use crate::fingerprint::similarity::{
    cosine, count_closeness, equality, jaccard, multiset_jaccard, weighted_mean, Multiset,
};
use crate::models::{ClassKind, ClassUnit};

/// Structural descriptor of one class within one build.
///
/// Every collection is a set or multiset, so the fingerprint does not depend
/// on declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassFingerprint {
    pub name: String,
    pub kind: ClassKind,
    pub super_name: Option<String>,
    pub interfaces: BTreeSet<String>,
    pub constructor_count: u32,
    pub has_static_initializer: bool,
    /// Method descriptor -> occurrence count, over all methods.
    pub method_signatures: Multiset,
    /// `name + descriptor` of every static method.
    pub static_signatures: BTreeSet<String>,
    /// Instruction kind -> count, over methods that have a body.
    pub instruction_histogram: Multiset,
    pub text_constants: BTreeSet<String>,
    pub static_field_types: Multiset,
    pub instance_field_types: Multiset,
}

impl ClassFingerprint {
    /// Build the fingerprint of one class. O(instructions in class).
    pub fn extract(class: &ClassUnit) -> Self {
        let mut constructor_count = 0;
        let mut has_static_initializer = false;
        let mut method_signatures = Multiset::new();
        let mut static_signatures = BTreeSet::new();
        let mut instruction_histogram = Multiset::new();
        let mut text_constants = BTreeSet::new();

        for method in &class.methods {
            if method.is_constructor() {
                constructor_count += 1;
            } else if method.is_static_initializer() {
                has_static_initializer = true;
            }

            *method_signatures
                .entry(method.descriptor.clone())
                .or_insert(0) += 1;

            if method.is_static {
                static_signatures.insert(format!("{}{}", method.name, method.descriptor));
            }

            if !method.has_code() {
                continue;
            }
            for insn in &method.instructions {
                *instruction_histogram.entry(insn.opcode.clone()).or_insert(0) += 1;
                if let Some(text) = insn.text_constant() {
                    text_constants.insert(text.to_string());
                }
            }
        }

        let mut static_field_types = Multiset::new();
        let mut instance_field_types = Multiset::new();
        for field in &class.fields {
            let bucket = if field.is_static {
                &mut static_field_types
            } else {
                &mut instance_field_types
            };
            *bucket.entry(field.descriptor.clone()).or_insert(0) += 1;
        }

        Self {
            name: class.name.clone(),
            kind: class.kind,
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.iter().cloned().collect(),
            constructor_count,
            has_static_initializer,
            method_signatures,
            static_signatures,
            instruction_histogram,
            text_constants,
            static_field_types,
            instance_field_types,
        }
    }

    /// `{super} ∪ interfaces`.
    pub fn hierarchy(&self) -> BTreeSet<&str> {
        self.super_name
            .iter()
            .chain(self.interfaces.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn method_count(&self) -> u32 {
        self.method_signatures.values().sum()
    }

    pub fn field_count(&self) -> u32 {
        self.static_field_types.values().sum::<u32>()
            + self.instance_field_types.values().sum::<u32>()
    }

    /// Per-component scores against another fingerprint.
    pub fn breakdown(&self, other: &ClassFingerprint) -> ClassBreakdown {
        let static_fields = multiset_jaccard(&self.static_field_types, &other.static_field_types);
        let instance_fields =
            multiset_jaccard(&self.instance_field_types, &other.instance_field_types);
        ClassBreakdown {
            classification: equality(&self.kind, &other.kind),
            hierarchy: jaccard(&self.hierarchy(), &other.hierarchy()),
            signatures: multiset_jaccard(&self.method_signatures, &other.method_signatures),
            instructions: cosine(&self.instruction_histogram, &other.instruction_histogram),
            text_constants: jaccard(&self.text_constants, &other.text_constants),
            static_signatures: jaccard(&self.static_signatures, &other.static_signatures),
            static_fields,
            instance_fields,
            constructors: count_closeness(self.constructor_count, other.constructor_count),
            static_initializer: equality(
                &self.has_static_initializer,
                &other.has_static_initializer,
            ),
        }
    }

    /// Weighted similarity in `[0, 1]`.
    pub fn similarity(&self, other: &ClassFingerprint, weights: &ClassWeights) -> f64 {
        self.breakdown(other).score(weights)
    }
}

/// Component scores of a class comparison, each in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassBreakdown {
    pub classification: f64,
    pub hierarchy: f64,
    pub signatures: f64,
    pub instructions: f64,
    pub text_constants: f64,
    pub static_signatures: f64,
    pub static_fields: f64,
    pub instance_fields: f64,
    pub constructors: f64,
    pub static_initializer: f64,
}

impl ClassBreakdown {
    /// Static and instance field agreement averaged into one component.
    pub fn field_types(&self) -> f64 {
        (self.static_fields + self.instance_fields) / 2.0
    }

    pub fn score(&self, weights: &ClassWeights) -> f64 {
        weighted_mean(&[
            (weights.classification, self.classification),
            (weights.hierarchy, self.hierarchy),
            (weights.signatures, self.signatures),
            (weights.instructions, self.instructions),
            (weights.text_constants, self.text_constants),
            (weights.static_signatures, self.static_signatures),
            (weights.field_types, self.field_types()),
            (weights.constructors, self.constructors),
            (weights.static_initializer, self.static_initializer),
        ])
    }
}
