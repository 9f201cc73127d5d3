//! Per-build call graph.
//!
//! Holds the direct `caller -> callees` relation and the `callee -> callers`
//! view derived from it at construction. Neither is mutated afterwards.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::models::{BuildSnapshot, SymbolKey};

/// Serialized form of one caller's outgoing calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjacency {
    pub caller: SymbolKey,
    pub callees: Vec<SymbolKey>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Adjacency>", into = "Vec<Adjacency>")]
pub struct CallGraph {
    callees: IndexMap<SymbolKey, IndexSet<SymbolKey>>,
    callers: IndexMap<SymbolKey, IndexSet<SymbolKey>>,
}

impl CallGraph {
    /// Build from an adjacency map (`caller -> callees`).
    pub fn from_adjacency<I, C>(adjacency: I) -> Self
    where
        I: IntoIterator<Item = (SymbolKey, C)>,
        C: IntoIterator<Item = SymbolKey>,
    {
        let mut callees: IndexMap<SymbolKey, IndexSet<SymbolKey>> = IndexMap::new();
        for (caller, targets) in adjacency {
            callees.entry(caller).or_default().extend(targets);
        }
        let callers = invert(&callees);
        Self { callees, callers }
    }

    /// Build from `(caller, callee)` edges.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (SymbolKey, SymbolKey)>,
    {
        let mut callees: IndexMap<SymbolKey, IndexSet<SymbolKey>> = IndexMap::new();
        for (caller, callee) in edges {
            callees.entry(caller).or_default().insert(callee);
        }
        let callers = invert(&callees);
        Self { callees, callers }
    }

    /// Scan method-reference operands of every method body in the build.
    ///
    /// With `restrict_to_build`, calls into methods not defined in the build
    /// (library calls, unresolved references) are dropped so every edge is
    /// internal.
    pub fn extract(build: &BuildSnapshot, restrict_to_build: bool) -> Self {
        let defined: HashSet<SymbolKey> = build.methods().map(|(key, _, _)| key).collect();
        let mut callees: IndexMap<SymbolKey, IndexSet<SymbolKey>> = IndexMap::new();
        for (caller, _, method) in build.methods() {
            let targets = callees.entry(caller).or_default();
            for insn in &method.instructions {
                if let Some(target) = insn.invoked() {
                    if !restrict_to_build || defined.contains(target) {
                        targets.insert(target.clone());
                    }
                }
            }
        }
        let callers = invert(&callees);
        Self { callees, callers }
    }

    pub fn callees(&self, key: &SymbolKey) -> Option<&IndexSet<SymbolKey>> {
        self.callees.get(key)
    }

    pub fn callers(&self, key: &SymbolKey) -> Option<&IndexSet<SymbolKey>> {
        self.callers.get(key)
    }

    /// Callees and callers of `key`, each neighbor once.
    pub fn neighbors(&self, key: &SymbolKey) -> IndexSet<&SymbolKey> {
        self.callees
            .get(key)
            .into_iter()
            .flatten()
            .chain(self.callers.get(key).into_iter().flatten())
            .collect()
    }

    /// Every key appearing as caller or callee, callers first.
    pub fn nodes(&self) -> impl Iterator<Item = &SymbolKey> {
        self.callees
            .keys()
            .chain(self.callers.keys().filter(|k| !self.callees.contains_key(*k)))
    }

    pub fn edge_count(&self) -> usize {
        self.callees.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }
}

impl From<Vec<Adjacency>> for CallGraph {
    fn from(adjacency: Vec<Adjacency>) -> Self {
        Self::from_adjacency(adjacency.into_iter().map(|a| (a.caller, a.callees)))
    }
}

impl From<CallGraph> for Vec<Adjacency> {
    fn from(graph: CallGraph) -> Self {
        graph
            .callees
            .into_iter()
            .map(|(caller, callees)| Adjacency {
                caller,
                callees: callees.into_iter().collect(),
            })
            .collect()
    }
}

fn invert(
    callees: &IndexMap<SymbolKey, IndexSet<SymbolKey>>,
) -> IndexMap<SymbolKey, IndexSet<SymbolKey>> {
    let mut callers: IndexMap<SymbolKey, IndexSet<SymbolKey>> = IndexMap::new();
    for (caller, targets) in callees {
        for callee in targets {
            callers
                .entry(callee.clone())
                .or_default()
                .insert(caller.clone());
        }
    }
    callers
}
