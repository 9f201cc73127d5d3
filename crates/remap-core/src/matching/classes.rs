//! Class-level matching from fingerprint similarity.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ClassWeights;
use crate::fingerprint::{ClassBreakdown, ClassFingerprint};

/// Match result between an old and a new class fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassMatch {
    pub old_name: String,
    pub new_name: String,
    pub similarity: f64,
    pub breakdown: ClassBreakdown,
}

/// Descending score, then ascending input position.
pub(crate) fn rank(a: (f64, usize), b: (f64, usize)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

/// For each old class, the top `k` new classes at or above `min_similarity`.
///
/// Old classes appear in input order; per old class the matches are sorted by
/// descending similarity with ties in new-build input order.
pub fn match_classes_top_k(
    old: &IndexMap<String, ClassFingerprint>,
    new: &IndexMap<String, ClassFingerprint>,
    k: usize,
    min_similarity: f64,
    weights: &ClassWeights,
) -> Vec<ClassMatch> {
    if old.is_empty() || new.is_empty() || k == 0 {
        return Vec::new();
    }
    let new_fps: Vec<&ClassFingerprint> = new.values().collect();

    let per_old: Vec<Vec<ClassMatch>> = old
        .values()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|old_fp| {
            let mut scored: Vec<(f64, usize, ClassBreakdown)> = new_fps
                .iter()
                .enumerate()
                .filter_map(|(index, new_fp)| {
                    let breakdown = old_fp.breakdown(new_fp);
                    let similarity = breakdown.score(weights);
                    (similarity >= min_similarity).then_some((similarity, index, breakdown))
                })
                .collect();
            scored.sort_by(|a, b| rank((a.0, a.1), (b.0, b.1)));
            scored.truncate(k);
            scored
                .into_iter()
                .map(|(similarity, index, breakdown)| ClassMatch {
                    old_name: old_fp.name.clone(),
                    new_name: new_fps[index].name.clone(),
                    similarity,
                    breakdown,
                })
                .collect()
        })
        .collect();

    per_old.into_iter().flatten().collect()
}

/// Greedy global one-to-one assignment: take the most similar remaining pair,
/// retire both classes, repeat. Returns `old name -> new name`.
pub fn greedy_one_to_one(
    old: &IndexMap<String, ClassFingerprint>,
    new: &IndexMap<String, ClassFingerprint>,
    min_similarity: f64,
    weights: &ClassWeights,
) -> IndexMap<String, String> {
    let mut pairs: Vec<(f64, usize, usize)> = old
        .values()
        .enumerate()
        .collect::<Vec<_>>()
        .par_iter()
        .flat_map_iter(|(oi, old_fp)| {
            new.values().enumerate().filter_map(move |(ni, new_fp)| {
                let similarity = old_fp.similarity(new_fp, weights);
                (similarity >= min_similarity).then_some((similarity, *oi, ni))
            })
        })
        .collect();
    pairs.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut used_old: HashSet<usize> = HashSet::new();
    let mut used_new: HashSet<usize> = HashSet::new();
    let mut mapping = IndexMap::new();
    for (_, oi, ni) in pairs {
        if used_old.contains(&oi) || used_new.contains(&ni) {
            continue;
        }
        used_old.insert(oi);
        used_new.insert(ni);
        if let (Some((old_name, _)), Some((new_name, _))) =
            (old.get_index(oi), new.get_index(ni))
        {
            mapping.insert(old_name.clone(), new_name.clone());
        }
    }
    mapping
}

/// Best new class per old class, used as owner context by the method matcher.
pub fn owner_context(matches: &[ClassMatch]) -> IndexMap<String, String> {
    let mut context: IndexMap<String, (f64, String)> = IndexMap::new();
    for m in matches {
        let better = context
            .get(&m.old_name)
            .map_or(true, |(best, _)| m.similarity > *best);
        if better {
            context.insert(m.old_name.clone(), (m.similarity, m.new_name.clone()));
        }
    }
    context
        .into_iter()
        .map(|(old, (_, new))| (old, new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_classes;
    use crate::models::{
        BuildSnapshot, ClassKind, ClassUnit, FieldUnit, Instruction, MethodUnit, Operand,
    };

    fn class(name: &str, marker: &str, fields: usize) -> ClassUnit {
        ClassUnit {
            name: name.to_string(),
            kind: ClassKind::Ordinary,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: vec![],
            methods: vec![MethodUnit {
                name: "a".to_string(),
                descriptor: "()Ljava/lang/String;".to_string(),
                is_static: false,
                is_abstract: false,
                instructions: vec![
                    Instruction::with_operand("LDC", Operand::Text(marker.to_string())),
                    Instruction::new("ARETURN"),
                ],
            }],
            fields: (0..fields)
                .map(|i| FieldUnit {
                    name: format!("f{i}"),
                    descriptor: "I".to_string(),
                    is_static: false,
                    is_final: false,
                })
                .collect(),
        }
    }

    fn builds() -> (IndexMap<String, ClassFingerprint>, IndexMap<String, ClassFingerprint>) {
        let old = BuildSnapshot::new(
            "old",
            vec![class("aa", "alpha", 1), class("bb", "beta", 3)],
        );
        let new = BuildSnapshot::new(
            "new",
            vec![class("yy", "beta", 3), class("zz", "alpha", 1)],
        );
        (fingerprint_classes(&old), fingerprint_classes(&new))
    }

    #[test]
    fn test_top_k_orders_by_similarity() {
        let (old, new) = builds();
        let matches = match_classes_top_k(&old, &new, 2, 0.0, &ClassWeights::default());
        assert_eq!(matches.len(), 4);
        assert_eq!(matches[0].old_name, "aa");
        assert_eq!(matches[0].new_name, "zz");
        assert_eq!(matches[0].similarity, 1.0);
        assert_eq!(matches[2].old_name, "bb");
        assert_eq!(matches[2].new_name, "yy");
    }

    #[test]
    fn test_top_k_respects_threshold() {
        let (old, new) = builds();
        let matches = match_classes_top_k(&old, &new, 5, 0.99, &ClassWeights::default());
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_greedy_one_to_one() {
        let (old, new) = builds();
        let mapping = greedy_one_to_one(&old, &new, 0.0, &ClassWeights::default());
        assert_eq!(mapping.get("aa").map(String::as_str), Some("zz"));
        assert_eq!(mapping.get("bb").map(String::as_str), Some("yy"));
    }

    #[test]
    fn test_owner_context_keeps_best() {
        let (old, new) = builds();
        let matches = match_classes_top_k(&old, &new, 2, 0.0, &ClassWeights::default());
        let context = owner_context(&matches);
        assert_eq!(context.get("aa").map(String::as_str), Some("zz"));
        assert_eq!(context.get("bb").map(String::as_str), Some("yy"));
    }

    #[test]
    fn test_rank_breaks_ties_by_position() {
        assert_eq!(rank((0.5, 1), (0.5, 2)), Ordering::Less);
        assert_eq!(rank((0.4, 0), (0.5, 2)), Ordering::Greater);
    }
}
