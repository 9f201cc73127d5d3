//! Field matching on top of a refined method mapping.
//!
//! Fields carry little structure of their own, so besides the erased type
//! and the modifiers a field is identified by which methods read and write
//! it. Once methods are mapped, an old field's readers translate into new
//! methods and should read the counterpart field.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{FieldWeights, RemapConfig};
use crate::descriptor;
use crate::fingerprint::similarity::{equality, weighted_mean};
use crate::guards::clamp_score;
use crate::models::{BuildSnapshot, FieldRef, Mapping, SymbolKey};

/// Knobs of the field matcher.
#[derive(Clone, Debug)]
pub struct FieldOptions {
    pub top_k: usize,
    pub min_score: f64,
    pub weights: FieldWeights,
}

impl FieldOptions {
    pub fn from_config(config: &RemapConfig) -> Self {
        Self {
            top_k: config.effective_top_k(),
            min_score: clamp_score(config.min_field_score),
            weights: config.field_weights.clone(),
        }
    }
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self::from_config(&RemapConfig::default())
    }
}

/// One declared field with the methods that touch it.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldProfile {
    pub key: FieldRef,
    /// Descriptor with classes of the same build erased to `L;`.
    pub shape: String,
    pub is_static: bool,
    pub is_final: bool,
    pub readers: IndexSet<SymbolKey>,
    pub writers: IndexSet<SymbolKey>,
}

/// Accepted field correspondence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub old: FieldRef,
    pub new: FieldRef,
    pub score: f64,
}

/// Profiles of every declared field, in declaration order. Accesses to
/// fields the build does not declare are ignored.
pub fn field_profiles(build: &BuildSnapshot) -> Vec<FieldProfile> {
    let local: HashSet<&str> = build.classes.iter().map(|c| c.name.as_str()).collect();
    let mut profiles: IndexMap<FieldRef, FieldProfile> = build
        .fields()
        .map(|(key, field)| {
            let profile = FieldProfile {
                shape: descriptor::erase_classes(&field.descriptor, |name| local.contains(name)),
                is_static: field.is_static,
                is_final: field.is_final,
                readers: IndexSet::new(),
                writers: IndexSet::new(),
                key: key.clone(),
            };
            (key, profile)
        })
        .collect();

    for (method_key, _, method) in build.methods() {
        for instruction in &method.instructions {
            let Some((field, writes)) = instruction.field_access() else {
                continue;
            };
            if let Some(profile) = profiles.get_mut(field) {
                let users = if writes {
                    &mut profile.writers
                } else {
                    &mut profile.readers
                };
                users.insert(method_key.clone());
            }
        }
    }
    profiles.into_values().collect()
}

/// How well `old_users`, translated through `methods`, overlap `new_users`.
///
/// Two empty sets agree fully; one empty side, or no translatable old user,
/// scores `0`. Otherwise the overlap is divided by the smaller side.
pub fn usage_agreement(
    old_users: &IndexSet<SymbolKey>,
    new_users: &IndexSet<SymbolKey>,
    methods: &Mapping,
) -> f64 {
    if old_users.is_empty() && new_users.is_empty() {
        return 1.0;
    }
    if old_users.is_empty() || new_users.is_empty() {
        return 0.0;
    }
    let translated: HashSet<&SymbolKey> = old_users.iter().filter_map(|m| methods.get(m)).collect();
    if translated.is_empty() {
        return 0.0;
    }
    let shared = translated.iter().filter(|m| new_users.contains(**m)).count();
    shared as f64 / translated.len().min(new_users.len()) as f64
}

/// Similarity of two field profiles under a method mapping.
pub fn score_fields(
    old: &FieldProfile,
    new: &FieldProfile,
    methods: &Mapping,
    weights: &FieldWeights,
) -> f64 {
    let modifiers = (equality(&old.is_static, &new.is_static)
        + equality(&old.is_final, &new.is_final))
        / 2.0;
    let usage = (usage_agreement(&old.readers, &new.readers, methods)
        + usage_agreement(&old.writers, &new.writers, methods))
        / 2.0;
    clamp_score(weighted_mean(&[
        (weights.descriptor, equality(&old.shape, &new.shape)),
        (weights.modifiers, modifiers),
        (weights.usage, usage),
    ]))
}

/// Match the declared fields of two builds.
///
/// When `owner_context` names a counterpart for an old field's owner, only
/// fields of that class are considered. Each old field keeps its best
/// `top_k` candidates at or above `min_score`; the survivors are then
/// assigned one-to-one, highest score first. Output is sorted by old key.
pub fn match_fields(
    old: &BuildSnapshot,
    new: &BuildSnapshot,
    methods: &Mapping,
    owner_context: &IndexMap<String, String>,
    options: &FieldOptions,
) -> Vec<FieldMatch> {
    let old_profiles = field_profiles(old);
    let new_profiles = field_profiles(new);
    if old_profiles.is_empty() || new_profiles.is_empty() || options.top_k == 0 {
        return Vec::new();
    }

    let mut pairs: Vec<(f64, usize, usize)> = old_profiles
        .par_iter()
        .enumerate()
        .flat_map_iter(|(oi, old_profile)| {
            let expected_owner = owner_context.get(&old_profile.key.owner);
            let mut scored: Vec<(f64, usize, usize)> = new_profiles
                .iter()
                .enumerate()
                .filter(|(_, new_profile)| {
                    expected_owner.map_or(true, |owner| *owner == new_profile.key.owner)
                })
                .map(|(ni, new_profile)| {
                    let score = score_fields(old_profile, new_profile, methods, &options.weights);
                    (score, oi, ni)
                })
                .filter(|(score, _, _)| *score >= options.min_score)
                .collect();
            scored.sort_by(by_score);
            scored.truncate(options.top_k);
            scored
        })
        .collect();
    pairs.sort_by(by_score);

    let mut used_old: HashSet<usize> = HashSet::new();
    let mut used_new: HashSet<usize> = HashSet::new();
    let mut matches = Vec::new();
    for (score, oi, ni) in pairs {
        if used_old.contains(&oi) || used_new.contains(&ni) {
            continue;
        }
        used_old.insert(oi);
        used_new.insert(ni);
        matches.push(FieldMatch {
            old: old_profiles[oi].key.clone(),
            new: new_profiles[ni].key.clone(),
            score,
        });
    }
    matches.sort_by(|a, b| a.old.cmp(&b.old));

    debug!(
        "Matched {} of {} old fields against {} new fields",
        matches.len(),
        old_profiles.len(),
        new_profiles.len()
    );
    matches
}

fn by_score(a: &(f64, usize, usize), b: &(f64, usize, usize)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassKind, ClassUnit, FieldUnit, Instruction, MethodUnit, Operand};

    fn field(name: &str, descriptor: &str) -> FieldUnit {
        FieldUnit {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            is_final: false,
        }
    }

    fn access(opcode: &str, owner: &str, name: &str) -> Instruction {
        Instruction::with_operand(opcode, Operand::Field(FieldRef::new(owner, name, "I")))
    }

    fn method(name: &str, body: Vec<Instruction>) -> MethodUnit {
        MethodUnit {
            name: name.to_string(),
            descriptor: "()V".to_string(),
            is_static: false,
            is_abstract: false,
            instructions: body,
        }
    }

    fn class(name: &str, methods: Vec<MethodUnit>, fields: Vec<FieldUnit>) -> ClassUnit {
        ClassUnit {
            name: name.to_string(),
            kind: ClassKind::Ordinary,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: vec![],
            methods,
            fields,
        }
    }

    /// Both builds declare two `int` fields, in swapped order; only the
    /// methods reading them tell the fields apart.
    fn builds() -> (BuildSnapshot, BuildSnapshot, Mapping) {
        let old = BuildSnapshot::new(
            "v1",
            vec![class(
                "aa",
                vec![
                    method("m1", vec![access("GETFIELD", "aa", "x")]),
                    method("m2", vec![access("GETFIELD", "aa", "y")]),
                ],
                vec![field("x", "I"), field("y", "I")],
            )],
        );
        let new = BuildSnapshot::new(
            "v2",
            vec![class(
                "zz",
                vec![
                    method("n1", vec![access("GETFIELD", "zz", "v")]),
                    method("n2", vec![access("GETFIELD", "zz", "u")]),
                ],
                vec![field("u", "I"), field("v", "I")],
            )],
        );
        let methods = Mapping::from_pairs([
            (SymbolKey::new("aa", "m1", "()V"), SymbolKey::new("zz", "n1", "()V")),
            (SymbolKey::new("aa", "m2", "()V"), SymbolKey::new("zz", "n2", "()V")),
        ])
        .unwrap();
        (old, new, methods)
    }

    #[test]
    fn test_profiles_split_readers_and_writers() {
        let build = BuildSnapshot::new(
            "v1",
            vec![class(
                "aa",
                vec![
                    method("get", vec![access("GETFIELD", "aa", "x")]),
                    method("set", vec![access("PUTFIELD", "aa", "x")]),
                    method("ext", vec![access("GETSTATIC", "java/lang/System", "out")]),
                ],
                vec![field("x", "I"), field("self", "Laa;")],
            )],
        );
        let profiles = field_profiles(&build);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].key, FieldRef::new("aa", "x", "I"));
        assert_eq!(profiles[0].readers.len(), 1);
        assert!(profiles[0].readers.contains(&SymbolKey::new("aa", "get", "()V")));
        assert!(profiles[0].writers.contains(&SymbolKey::new("aa", "set", "()V")));
        assert_eq!(profiles[1].shape, "L;");
        assert!(profiles[1].readers.is_empty());
    }

    #[test]
    fn test_usage_agreement() {
        let (old, new, methods) = builds();
        let (old, new) = (field_profiles(&old), field_profiles(&new));
        // x is read by m1 -> n1, which reads v.
        assert_eq!(usage_agreement(&old[0].readers, &new[1].readers, &methods), 1.0);
        assert_eq!(usage_agreement(&old[0].readers, &new[0].readers, &methods), 0.0);
        assert_eq!(usage_agreement(&old[0].writers, &new[0].writers, &methods), 1.0);
        assert_eq!(usage_agreement(&old[0].readers, &new[0].writers, &methods), 0.0);
        assert_eq!(usage_agreement(&old[0].readers, &new[1].readers, &Mapping::new()), 0.0);
    }

    #[test]
    fn test_fields_follow_method_mapping() {
        let (old, new, methods) = builds();
        let options = FieldOptions::default();
        let matches = match_fields(&old, &new, &methods, &IndexMap::new(), &options);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].old, FieldRef::new("aa", "x", "I"));
        assert_eq!(matches[0].new, FieldRef::new("zz", "v", "I"));
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[1].old, FieldRef::new("aa", "y", "I"));
        assert_eq!(matches[1].new, FieldRef::new("zz", "u", "I"));
    }

    #[test]
    fn test_descriptor_and_modifiers_weigh_in() {
        let (old, new, methods) = builds();
        let (old, new) = (field_profiles(&old), field_profiles(&new));
        let weights = FieldWeights::default();
        let mut other = new[1].clone();
        other.shape = "J".to_string();
        other.is_static = true;
        let full = score_fields(&old[0], &new[1], &methods, &weights);
        let degraded = score_fields(&old[0], &other, &methods, &weights);
        let expected = (0.5 * weights.modifiers + weights.usage) / weights.total();
        assert_eq!(full, 1.0);
        assert!((degraded - expected).abs() < 1e-12);
    }

    #[test]
    fn test_owner_context_restricts_candidates() {
        let (old, new, methods) = builds();
        let context: IndexMap<String, String> =
            [("aa".to_string(), "yy".to_string())].into_iter().collect();
        let matches = match_fields(&old, &new, &methods, &context, &FieldOptions::default());
        assert!(matches.is_empty());
    }

    #[test]
    fn test_threshold_and_one_to_one() {
        let (old, new, _) = builds();
        // Without a method mapping every pair scores the same, so the
        // threshold decides whether anything is reported at all.
        let strict = FieldOptions {
            min_score: 0.9,
            ..FieldOptions::default()
        };
        assert!(match_fields(&old, &new, &Mapping::new(), &IndexMap::new(), &strict).is_empty());

        let loose = match_fields(
            &old,
            &new,
            &Mapping::new(),
            &IndexMap::new(),
            &FieldOptions::default(),
        );
        assert_eq!(loose.len(), 2);
        let targets: HashSet<&FieldRef> = loose.iter().map(|m| &m.new).collect();
        assert_eq!(targets.len(), 2);
    }
}
