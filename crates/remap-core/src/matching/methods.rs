//! Candidate matching between old and new methods.
//!
//! Scores every old method against every new method and keeps the best `k`
//! per old method. The call graph is not consulted here; graph evidence is
//! left to the refiner.

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::debug;

use crate::config::{MethodWeights, RemapConfig};
use crate::descriptor;
use crate::fingerprint::MethodFingerprint;
use crate::guards::clamp_score;
use crate::matching::classes::rank;
use crate::models::{CandidateMatch, SymbolKey, CONSTRUCTOR_NAME, STATIC_INITIALIZER_NAME};

/// Knobs of the method matcher.
#[derive(Clone, Debug)]
pub struct MatchOptions {
    pub top_k: usize,
    pub class_weight: f64,
    pub require_compatible_descriptors: bool,
    pub weights: MethodWeights,
}

impl MatchOptions {
    pub fn from_config(config: &RemapConfig) -> Self {
        Self {
            top_k: config.effective_top_k(),
            class_weight: clamp_score(config.class_weight),
            require_compatible_descriptors: config.require_compatible_descriptors,
            weights: config.method_weights.clone(),
        }
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::from_config(&RemapConfig::default())
    }
}

/// Constructors and static initializers keep their names through renaming,
/// so they only pair with their own kind.
fn special_names_agree(old: &SymbolKey, new: &SymbolKey) -> bool {
    let special = |name: &str| name == CONSTRUCTOR_NAME || name == STATIC_INITIALIZER_NAME;
    if special(&old.name) || special(&new.name) {
        old.name == new.name
    } else {
        true
    }
}

/// Whether `(old, new)` may be scored at all.
pub fn is_eligible(old: &SymbolKey, new: &SymbolKey, options: &MatchOptions) -> bool {
    special_names_agree(old, new)
        && (!options.require_compatible_descriptors
            || descriptor::compatible_arguments(&old.descriptor, &new.descriptor))
}

/// Base score of one pair, with the owner boost applied when the candidate's
/// owner is the class matched to the old method's owner.
pub fn score_pair(
    old: &MethodFingerprint,
    new: &MethodFingerprint,
    expected_owner: Option<&str>,
    options: &MatchOptions,
) -> f64 {
    let base = old.similarity(new, &options.weights);
    let boosted = match expected_owner {
        Some(owner) if owner == new.key.owner => {
            base * (1.0 - options.class_weight) + options.class_weight
        }
        _ => base,
    };
    clamp_score(boosted)
}

/// Top-`k` candidates for every old method.
///
/// `owner_context` maps old class names to their matched new class. Output
/// lists old methods in input order; each old method's candidates are sorted
/// by descending score, ties in new-build input order.
pub fn match_methods_top_k(
    old: &[MethodFingerprint],
    new: &[MethodFingerprint],
    owner_context: &IndexMap<String, String>,
    options: &MatchOptions,
) -> Vec<CandidateMatch> {
    if old.is_empty() || new.is_empty() || options.top_k == 0 {
        return Vec::new();
    }

    let per_old: Vec<Vec<CandidateMatch>> = old
        .par_iter()
        .map(|old_fp| {
            let expected_owner = owner_context.get(&old_fp.key.owner).map(String::as_str);
            let mut scored: Vec<(f64, usize)> = new
                .iter()
                .enumerate()
                .filter(|(_, new_fp)| is_eligible(&old_fp.key, &new_fp.key, options))
                .map(|(index, new_fp)| {
                    (score_pair(old_fp, new_fp, expected_owner, options), index)
                })
                .collect();
            scored.sort_by(|a, b| rank(*a, *b));
            scored.truncate(options.top_k);
            scored
                .into_iter()
                .map(|(score, index)| {
                    CandidateMatch::new(old_fp.key.clone(), new[index].key.clone(), score)
                })
                .collect()
        })
        .collect();

    let candidates: Vec<CandidateMatch> = per_old.into_iter().flatten().collect();
    debug!(
        "Matched {} old methods against {} new methods: {} candidates",
        old.len(),
        new.len(),
        candidates.len()
    );
    candidates
}
