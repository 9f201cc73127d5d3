//! Call-graph refinement of candidate matches into a one-to-one mapping.
//!
//! The refiner starts from seeds plus each old method's best free candidate,
//! then repeatedly re-scores every candidate by how well its call-graph
//! neighborhood agrees with the current mapping:
//!
//! ```text
//! combined = base * (1 - neighbor_weight) + agreement * neighbor_weight
//! ```
//!
//! Each round every old key proposes its best candidate, competing proposals
//! for the same new key are settled by combined score, and losers fall back
//! to their best unclaimed candidate. Iteration stops when a round leaves the
//! mapping unchanged or the round budget runs out.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RemapConfig;
use crate::errors::{RemapError, RemapResult};
use crate::graph::CallGraph;
use crate::guards::{self, is_unit_interval};
use crate::models::{CandidateMatch, Mapping, SeedMapping, SymbolKey};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefineOptions {
    pub max_rounds: usize,
    /// Share of the combined score taken by neighbor agreement, in `[0, 1]`.
    pub neighbor_weight: f64,
}

impl RefineOptions {
    pub fn new(max_rounds: usize, neighbor_weight: f64) -> RemapResult<Self> {
        let options = Self {
            max_rounds,
            neighbor_weight,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn from_config(config: &RemapConfig) -> RemapResult<Self> {
        Self::new(config.effective_max_rounds(), config.neighbor_weight)
    }

    pub fn validate(&self) -> RemapResult<()> {
        if !is_unit_interval(self.neighbor_weight) {
            return Err(RemapError::InvalidConfig(format!(
                "neighbor_weight must be in [0,1], got {}",
                self.neighbor_weight
            )));
        }
        Ok(())
    }
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_rounds: guards::DEFAULT_MAX_ROUNDS,
            neighbor_weight: 0.3,
        }
    }
}

/// What one refinement round did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// 1-based round number.
    pub round: usize,
    /// Old keys whose assignment differs from the previous round.
    pub changed: usize,
    /// Proposals discarded because a stronger proposer took the same new key.
    pub conflicts: usize,
    /// Losers that claimed another free candidate.
    pub fallbacks: usize,
    /// Old keys with candidates left without a counterpart.
    pub unmapped: usize,
}

/// Final state of a refinement run.
#[derive(Clone, Debug)]
pub struct Refinement {
    pub mapping: Mapping,
    pub rounds: usize,
    pub converged: bool,
    pub history: Vec<RoundSummary>,
}

// ---------------------------------------------------------------------------
// Refiner
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Candidate<'a> {
    new_key: &'a SymbolKey,
    base: f64,
}

#[derive(Clone, Copy, Debug)]
struct Proposal<'a> {
    old_key: &'a SymbolKey,
    new_key: &'a SymbolKey,
    combined: f64,
}

type Assignment<'a> = IndexMap<&'a SymbolKey, &'a SymbolKey>;

/// Stepwise refinement state over borrowed candidates, graphs and seeds.
pub struct Refiner<'a> {
    options: RefineOptions,
    /// Candidates per old key, descending base score, ties in input order.
    grouped: IndexMap<&'a SymbolKey, Vec<Candidate<'a>>>,
    /// Old keys by descending best base score, ties in input order.
    order: Vec<&'a SymbolKey>,
    old_neighbors: HashMap<&'a SymbolKey, IndexSet<&'a SymbolKey>>,
    new_neighbors: HashMap<&'a SymbolKey, IndexSet<&'a SymbolKey>>,
    current: Assignment<'a>,
    /// `new -> old` owner of each claimed new key. Differs from the inverse
    /// of `current` only while bootstrap duplicates are unresolved, where the
    /// first claimant holds the key.
    holders: HashMap<&'a SymbolKey, &'a SymbolKey>,
    rounds: usize,
    converged: bool,
    history: Vec<RoundSummary>,
}

impl<'a> Refiner<'a> {
    /// Validate options, index the inputs and build the bootstrap mapping
    /// from seeds and gap filling.
    ///
    /// The bootstrap mapping may assign one new key to several old keys when
    /// every candidate of an old key was already claimed; the first round
    /// resolves that.
    pub fn new(
        candidates: &'a [CandidateMatch],
        old_graph: &'a CallGraph,
        new_graph: &'a CallGraph,
        options: RefineOptions,
        seed: &'a SeedMapping,
    ) -> RemapResult<Self> {
        options.validate()?;

        let grouped = group_candidates(candidates);
        let mut order: Vec<&'a SymbolKey> = grouped.keys().copied().collect();
        order.sort_by(|a, b| best_base(&grouped, b).total_cmp(&best_base(&grouped, a)));

        let old_neighbors = grouped
            .keys()
            .map(|old| (*old, old_graph.neighbors(old)))
            .collect();
        let new_neighbors = grouped
            .values()
            .flatten()
            .map(|c| (c.new_key, new_graph.neighbors(c.new_key)))
            .collect();

        let mut refiner = Self {
            options,
            grouped,
            order,
            old_neighbors,
            new_neighbors,
            current: IndexMap::new(),
            holders: HashMap::new(),
            rounds: 0,
            converged: false,
            history: Vec::new(),
        };
        refiner.bootstrap(seed);
        Ok(refiner)
    }

    fn base_score(&self, old: &SymbolKey, new: &SymbolKey) -> f64 {
        self.grouped
            .get(old)
            .and_then(|list| list.iter().find(|c| c.new_key == new))
            .map_or(0.0, |c| c.base)
    }

    fn bootstrap(&mut self, seed: &'a SeedMapping) {
        let mut claimed: HashMap<&'a SymbolKey, &'a SymbolKey> = HashMap::new();

        for (old, new) in seed.iter() {
            if !self.grouped.contains_key(old) {
                warn!("Seed {old} -> {new} has no candidates; it only informs the first round");
            }
            let score = self.base_score(old, new);
            match claimed.get(new).copied() {
                Some(existing) => {
                    if score > self.base_score(existing, new) {
                        self.current.shift_remove(existing);
                        self.current.insert(old, new);
                        claimed.insert(new, old);
                    }
                }
                None => {
                    self.current.insert(old, new);
                    claimed.insert(new, old);
                }
            }
        }

        let mut forced = 0usize;
        for (old, list) in &self.grouped {
            if self.current.contains_key(old) {
                continue;
            }
            let pick = list
                .iter()
                .find(|c| !claimed.contains_key(c.new_key))
                .or_else(|| {
                    forced += 1;
                    list.first()
                });
            if let Some(candidate) = pick {
                self.current.insert(*old, candidate.new_key);
                claimed.entry(candidate.new_key).or_insert(*old);
            }
        }

        self.holders = claimed;
        debug!(
            "Bootstrap mapping: {} pairs from {} seeds, {} forced onto claimed targets",
            self.current.len(),
            seed.len(),
            forced
        );
    }

    /// Fraction of `old`'s mapped neighbors whose counterpart neighbors
    /// `candidate`. `0` when no neighbor is mapped yet.
    fn agreement(&self, old: &SymbolKey, candidate: &SymbolKey) -> f64 {
        let Some(neighbors) = self.old_neighbors.get(old) else {
            return 0.0;
        };
        let candidate_neighbors = self.new_neighbors.get(candidate);
        let mut considered = 0usize;
        let mut matched = 0usize;
        for neighbor in neighbors {
            let Some(counterpart) = self.current.get(*neighbor) else {
                continue;
            };
            considered += 1;
            if candidate_neighbors.is_some_and(|set| set.contains(*counterpart)) {
                matched += 1;
            }
        }
        if considered == 0 {
            0.0
        } else {
            matched as f64 / considered as f64
        }
    }

    fn combined(&self, old: &SymbolKey, candidate: &Candidate<'_>) -> f64 {
        let weight = self.options.neighbor_weight;
        candidate.base * (1.0 - weight) + self.agreement(old, candidate.new_key) * weight
    }

    /// Best candidate of `old` under the current mapping. Ties keep the
    /// current assignment, otherwise the earlier candidate.
    fn propose(&self, old: &'a SymbolKey) -> Option<Proposal<'a>> {
        let prior = self.current.get(old).copied();
        let mut best: Option<Proposal<'a>> = None;
        for candidate in self.grouped.get(old)? {
            let combined = self.combined(old, candidate);
            let replace = match best {
                None => true,
                Some(held) => {
                    combined > held.combined
                        || (combined == held.combined && prior == Some(candidate.new_key))
                }
            };
            if replace {
                best = Some(Proposal {
                    old_key: old,
                    new_key: candidate.new_key,
                    combined,
                });
            }
        }
        best
    }

    fn holds(&self, proposal: &Proposal<'_>) -> bool {
        self.holders.get(proposal.new_key) == Some(&proposal.old_key)
    }

    /// Run one round. Returns `None` once converged or out of budget.
    pub fn step(&mut self) -> Option<RoundSummary> {
        if self.is_done() {
            return None;
        }

        // Proposals only read the mapping as of the start of the round.
        let proposals: Vec<Option<Proposal<'a>>> =
            self.order.par_iter().map(|old| self.propose(*old)).collect();

        let mut winners: IndexMap<&'a SymbolKey, Proposal<'a>> = IndexMap::new();
        let mut conflicts = 0usize;
        for proposal in proposals.into_iter().flatten() {
            match winners.get_mut(proposal.new_key) {
                None => {
                    winners.insert(proposal.new_key, proposal);
                }
                Some(held) => {
                    conflicts += 1;
                    let stronger = proposal.combined > held.combined
                        || (proposal.combined == held.combined
                            && self.holds(&proposal)
                            && !self.holds(held));
                    if stronger {
                        *held = proposal;
                    }
                }
            }
        }

        let mut assigned: HashMap<&'a SymbolKey, &'a SymbolKey> = winners
            .values()
            .map(|p| (p.old_key, p.new_key))
            .collect();
        let mut taken: HashSet<&'a SymbolKey> = winners.keys().copied().collect();
        let mut fallbacks = 0usize;
        for old in &self.order {
            if assigned.contains_key(old) {
                continue;
            }
            let free = self.grouped[old]
                .iter()
                .find(|c| !taken.contains(c.new_key));
            if let Some(candidate) = free {
                assigned.insert(*old, candidate.new_key);
                taken.insert(candidate.new_key);
                fallbacks += 1;
            }
        }

        let next: Assignment<'a> = self
            .grouped
            .keys()
            .filter_map(|old| assigned.get(old).map(|new| (*old, *new)))
            .collect();

        self.rounds += 1;
        let summary = RoundSummary {
            round: self.rounds,
            changed: count_changed(&self.current, &next),
            conflicts,
            fallbacks,
            unmapped: self.grouped.len() - next.len(),
        };
        debug!(
            "Refinement round {}: {} changed, {} conflicts, {} fallbacks, {} unmapped",
            summary.round, summary.changed, summary.conflicts, summary.fallbacks, summary.unmapped
        );

        self.converged = next == self.current;
        self.holders = next.iter().map(|(old, new)| (*new, *old)).collect();
        self.current = next;
        debug_assert!(self.is_injective());
        self.history.push(summary.clone());
        Some(summary)
    }

    pub fn is_done(&self) -> bool {
        self.converged || self.rounds >= self.options.max_rounds
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Current counterpart of `old`.
    pub fn assigned(&self, old: &SymbolKey) -> Option<&SymbolKey> {
        self.current.get(old).copied()
    }

    /// Current pairs, old keys in candidate order.
    pub fn current(&self) -> impl Iterator<Item = (&'a SymbolKey, &'a SymbolKey)> + '_ {
        self.current.iter().map(|(old, new)| (*old, *new))
    }

    /// No new key is the target of more than one old key.
    pub fn is_injective(&self) -> bool {
        let targets: HashSet<&SymbolKey> = self.current.values().copied().collect();
        targets.len() == self.current.len()
    }

    /// Run the remaining rounds and freeze the result.
    pub fn run(mut self) -> RemapResult<Refinement> {
        while self.step().is_some() {}
        self.finish()
    }

    /// Freeze the current state. If no round ran, duplicate targets left by
    /// the bootstrap are settled by base score.
    pub fn finish(self) -> RemapResult<Refinement> {
        if !self.converged && self.rounds >= self.options.max_rounds && self.rounds > 0 {
            warn!(
                "Refinement stopped after {} rounds without converging",
                self.rounds
            );
        }

        let pairs: Vec<(&SymbolKey, &SymbolKey)> = if self.is_injective() {
            self.current.iter().map(|(old, new)| (*old, *new)).collect()
        } else {
            self.settle_duplicates()
        };

        let mapping = Mapping::from_pairs(
            pairs
                .into_iter()
                .map(|(old, new)| (old.clone(), new.clone())),
        )?;
        Ok(Refinement {
            mapping,
            rounds: self.rounds,
            converged: self.converged,
            history: self.history,
        })
    }

    fn settle_duplicates(&self) -> Vec<(&'a SymbolKey, &'a SymbolKey)> {
        let mut holder: IndexMap<&'a SymbolKey, (&'a SymbolKey, f64)> = IndexMap::new();
        for (old, new) in &self.current {
            let score = self.base_score(old, new);
            let stronger = holder.get(*new).map_or(true, |held| score > held.1);
            if stronger {
                holder.insert(*new, (*old, score));
            }
        }
        let kept: HashSet<&SymbolKey> = holder.values().map(|(old, _)| *old).collect();
        self.current
            .iter()
            .filter(|(old, _)| kept.contains(**old))
            .map(|(old, new)| (*old, *new))
            .collect()
    }
}

/// Group by old key in first-appearance order, each group sorted by
/// descending base score (stable). Repeated pairs keep their best score.
fn group_candidates(candidates: &[CandidateMatch]) -> IndexMap<&SymbolKey, Vec<Candidate<'_>>> {
    let mut grouped: IndexMap<&SymbolKey, Vec<Candidate<'_>>> = IndexMap::new();
    for m in candidates {
        grouped.entry(&m.old_key).or_default().push(Candidate {
            new_key: &m.new_key,
            base: guards::clamp_score(m.score),
        });
    }
    for list in grouped.values_mut() {
        list.sort_by(|a, b| b.base.total_cmp(&a.base));
        let mut seen: HashSet<&SymbolKey> = HashSet::new();
        list.retain(|c| seen.insert(c.new_key));
    }
    grouped
}

fn best_base(grouped: &IndexMap<&SymbolKey, Vec<Candidate<'_>>>, old: &SymbolKey) -> f64 {
    grouped
        .get(old)
        .and_then(|list| list.first())
        .map_or(0.0, |c| c.base)
}

fn count_changed(before: &Assignment<'_>, after: &Assignment<'_>) -> usize {
    let dropped_or_moved = before
        .iter()
        .filter(|(old, new)| after.get(**old) != Some(*new))
        .count();
    let added = after.keys().filter(|old| !before.contains_key(**old)).count();
    dropped_or_moved + added
}

/// Refine `candidates` into an injective mapping.
///
/// Fails only when `options.neighbor_weight` is outside `[0, 1]`. Old keys
/// whose candidates are all lost to stronger competitors are simply absent
/// from the result.
pub fn refine(
    candidates: &[CandidateMatch],
    old_graph: &CallGraph,
    new_graph: &CallGraph,
    options: RefineOptions,
    seed: &SeedMapping,
) -> RemapResult<Refinement> {
    Refiner::new(candidates, old_graph, new_graph, options, seed)?.run()
}
