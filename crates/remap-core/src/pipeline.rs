//! End-to-end comparison of two builds.
//!
//! fingerprints -> class context -> method candidates -> refinement
//! -> field matching -> report

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RemapConfig;
use crate::errors::RemapResult;
use crate::fingerprint::{fingerprint_classes, fingerprint_methods};
use crate::graph::CallGraph;
use crate::matching::{
    match_classes_top_k, match_fields, match_methods_top_k, owner_context, ClassMatch,
    FieldMatch, FieldOptions, MatchOptions,
};
use crate::models::{BuildSnapshot, Mapping, SeedMapping, SymbolKey};
use crate::refine::{refine, RefineOptions, RoundSummary};

/// One build: its code units and its call graph.
#[derive(Clone, Debug)]
pub struct BuildInput {
    pub snapshot: BuildSnapshot,
    pub call_graph: CallGraph,
}

impl BuildInput {
    pub fn new(snapshot: BuildSnapshot, call_graph: CallGraph) -> Self {
        Self {
            snapshot,
            call_graph,
        }
    }

    /// Derive the call graph from the snapshot's own method references,
    /// keeping only calls between methods of the build.
    pub fn from_snapshot(snapshot: BuildSnapshot) -> Self {
        let call_graph = CallGraph::extract(&snapshot, true);
        Self::new(snapshot, call_graph)
    }
}

/// One accepted correspondence with its base candidate score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub old: SymbolKey,
    pub new: SymbolKey,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemapReport {
    pub old_label: String,
    pub new_label: String,
    /// Sorted by old key.
    pub entries: Vec<MappingEntry>,
    /// Old methods left without a counterpart, in build order.
    pub unmapped: Vec<SymbolKey>,
    pub rounds: usize,
    pub converged: bool,
    pub candidate_count: usize,
    pub class_matches: Vec<ClassMatch>,
    /// Field correspondences, sorted by old key.
    #[serde(default)]
    pub fields: Vec<FieldMatch>,
    pub history: Vec<RoundSummary>,
    /// SHA-256 of the canonical mapping listing.
    pub digest: String,
    pub elapsed_ms: i64,
}

impl RemapReport {
    /// Rebuild the injective mapping from the report entries.
    pub fn mapping(&self) -> RemapResult<Mapping> {
        Mapping::from_pairs(
            self.entries
                .iter()
                .map(|e| (e.old.clone(), e.new.clone())),
        )
    }

    /// Entries as a seed for a follow-up run.
    pub fn to_seed(&self) -> SeedMapping {
        self.entries
            .iter()
            .map(|e| (e.old.clone(), e.new.clone()))
            .collect()
    }
}

/// Compare two builds and return the refined method mapping.
///
/// The configuration is validated before any work starts. Work runs on a
/// rayon pool sized by `config.workers`; if the pool cannot be built the
/// global pool is used instead.
pub fn remap(
    old: &BuildInput,
    new: &BuildInput,
    seed: &SeedMapping,
    config: &RemapConfig,
) -> RemapResult<RemapReport> {
    config.validate()?;
    let options = RefineOptions::from_config(config)?;
    let started = Instant::now();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.effective_workers())
        .build();
    let mut report = match pool {
        Ok(pool) => pool.install(|| run(old, new, seed, config, options))?,
        Err(e) => {
            warn!("Failed to build worker pool, using the global pool: {e}");
            run(old, new, seed, config, options)?
        }
    };

    report.elapsed_ms = started.elapsed().as_millis() as i64;
    info!(
        "Remapped {}/{} methods from {} to {} in {} rounds (converged={}, {} ms)",
        report.entries.len(),
        old.snapshot.method_count(),
        report.old_label,
        report.new_label,
        report.rounds,
        report.converged,
        report.elapsed_ms
    );
    Ok(report)
}

fn run(
    old: &BuildInput,
    new: &BuildInput,
    seed: &SeedMapping,
    config: &RemapConfig,
    options: RefineOptions,
) -> RemapResult<RemapReport> {
    let old_classes = fingerprint_classes(&old.snapshot);
    let new_classes = fingerprint_classes(&new.snapshot);
    let class_matches = match_classes_top_k(
        &old_classes,
        &new_classes,
        config.effective_top_k(),
        config.min_class_similarity,
        &config.class_weights,
    );
    let context = owner_context(&class_matches);
    info!(
        "Class context: {} of {} old classes matched ({} new classes)",
        context.len(),
        old_classes.len(),
        new_classes.len()
    );

    let old_methods = fingerprint_methods(&old.snapshot);
    let new_methods = fingerprint_methods(&new.snapshot);
    let candidates = match_methods_top_k(
        &old_methods,
        &new_methods,
        &context,
        &MatchOptions::from_config(config),
    );
    info!(
        "Scored {} old methods against {} new methods: {} candidates",
        old_methods.len(),
        new_methods.len(),
        candidates.len()
    );

    let refinement = refine(
        &candidates,
        &old.call_graph,
        &new.call_graph,
        options,
        seed,
    )?;

    let fields = match_fields(
        &old.snapshot,
        &new.snapshot,
        &refinement.mapping,
        &context,
        &FieldOptions::from_config(config),
    );
    info!(
        "Matched {} fields using {} method pairs",
        fields.len(),
        refinement.mapping.len()
    );

    let base: HashMap<(&SymbolKey, &SymbolKey), f64> = candidates
        .iter()
        .map(|c| ((&c.old_key, &c.new_key), c.score))
        .collect();
    let entries = refinement
        .mapping
        .sorted_pairs()
        .into_iter()
        .map(|(o, n)| MappingEntry {
            old: o.clone(),
            new: n.clone(),
            score: base.get(&(o, n)).copied().unwrap_or(0.0),
        })
        .collect();
    let unmapped = old_methods
        .iter()
        .filter(|fp| !refinement.mapping.contains_old(&fp.key))
        .map(|fp| fp.key.clone())
        .collect();

    Ok(RemapReport {
        old_label: old.snapshot.label.clone(),
        new_label: new.snapshot.label.clone(),
        entries,
        unmapped,
        rounds: refinement.rounds,
        converged: refinement.converged,
        candidate_count: candidates.len(),
        class_matches,
        fields,
        history: refinement.history,
        digest: refinement.mapping.digest(),
        elapsed_ms: 0,
    })
}
