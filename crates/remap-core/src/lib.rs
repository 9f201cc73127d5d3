//! Remap core library: cross-version symbol matching for obfuscated builds.
//!
//! Given two builds of the same program whose symbol names were rewritten
//! independently, this crate fingerprints every class and method, scores
//! candidate correspondences between the builds, and refines them with
//! call-graph evidence into an injective `old -> new` method mapping. Fields
//! are matched last, using the methods that read and write them.
//!
//! The usual entry point is [`pipeline::remap`]; the individual stages are
//! public for callers that bring their own candidates or call graphs.

pub mod config;
pub mod descriptor;
pub mod errors;
pub mod fingerprint;
pub mod graph;
pub mod guards;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod refine;
pub mod snapshot;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{ClassWeights, FieldWeights, MethodWeights, RemapConfig};
pub use errors::{RemapError, RemapResult};
pub use fingerprint::{ClassFingerprint, MethodFingerprint};
pub use graph::CallGraph;
pub use matching::{ClassMatch, FieldMatch, FieldOptions, MatchOptions};
pub use models::{
    BuildSnapshot, CandidateMatch, ClassKind, ClassUnit, FieldRef, FieldUnit, Instruction,
    Mapping, MethodUnit, Operand, SeedMapping, SymbolKey,
};
pub use pipeline::{remap, BuildInput, MappingEntry, RemapReport};
pub use refine::{refine, RefineOptions, Refinement, Refiner, RoundSummary};
