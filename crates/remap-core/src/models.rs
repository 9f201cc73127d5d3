//! Shared typed models used across fingerprinting, matching, and refinement.
//!
//! The code-unit types (`ClassUnit`, `MethodUnit`, `FieldUnit`, `Instruction`)
//! describe one build as handed over by an external loader. Everything else is
//! derived from them and never mutated after construction, except `Mapping`,
//! which is the artifact the refiner produces.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{RemapError, RemapResult};

// ---------------------------------------------------------------------------
// Well-known member names
// ---------------------------------------------------------------------------

/// Name of instance constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Name of the static initializer.
pub const STATIC_INITIALIZER_NAME: &str = "<clinit>";

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Identifies one method uniquely within one build.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl SymbolKey {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// `owner.name` followed by the descriptor, e.g. `ab.c(I)V`.
    pub fn long_name(&self) -> String {
        format!("{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Identifies one field within one build; also the operand of field
/// access instructions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

// ---------------------------------------------------------------------------
// Code units (loader boundary)
// ---------------------------------------------------------------------------

/// Classification tag of a class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Ordinary,
    Interface,
    Enumerated,
    Annotation,
    #[default]
    Unknown,
}

impl ClassKind {
    const ACC_INTERFACE: u16 = 0x0200;
    const ACC_ANNOTATION: u16 = 0x2000;
    const ACC_ENUM: u16 = 0x4000;

    /// Classify JVM class access flags. Annotations are also interfaces, so
    /// the annotation bit is tested first.
    pub fn from_access_flags(access: u16) -> Self {
        if access & Self::ACC_ANNOTATION != 0 {
            ClassKind::Annotation
        } else if access & Self::ACC_INTERFACE != 0 {
            ClassKind::Interface
        } else if access & Self::ACC_ENUM != 0 {
            ClassKind::Enumerated
        } else {
            ClassKind::Ordinary
        }
    }
}

/// Operand attached to an instruction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int(i64),
    Float(f64),
    /// A text constant pushed by the instruction.
    Text(String),
    /// A type reference (`new`, `checkcast`, `instanceof`, class literals).
    Type(String),
    Method(SymbolKey),
    Field(FieldRef),
}

/// One instruction of a method body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Instruction kind, e.g. `INVOKEVIRTUAL`.
    pub opcode: String,
    #[serde(default)]
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            operand: Operand::None,
        }
    }

    pub fn with_operand(opcode: impl Into<String>, operand: Operand) -> Self {
        Self {
            opcode: opcode.into(),
            operand,
        }
    }

    pub fn text_constant(&self) -> Option<&str> {
        match &self.operand {
            Operand::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn invoked(&self) -> Option<&SymbolKey> {
        match &self.operand {
            Operand::Method(key) => Some(key),
            _ => None,
        }
    }

    /// Field read or written by this instruction, with `true` for writes.
    pub fn field_access(&self) -> Option<(&FieldRef, bool)> {
        match &self.operand {
            Operand::Field(field) => {
                let writes = matches!(self.opcode.as_str(), "PUTFIELD" | "PUTSTATIC");
                Some((field, writes))
            }
            _ => None,
        }
    }
}

/// A method as produced by the loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodUnit {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl MethodUnit {
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER_NAME
    }

    /// Abstract and declaration-only methods carry no body.
    pub fn has_code(&self) -> bool {
        !self.is_abstract && !self.instructions.is_empty()
    }
}

/// A field as produced by the loader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUnit {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
}

/// A class with its complete structural data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassUnit {
    pub name: String,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub methods: Vec<MethodUnit>,
    #[serde(default)]
    pub fields: Vec<FieldUnit>,
}

impl ClassUnit {
    pub fn method_key(&self, method: &MethodUnit) -> SymbolKey {
        SymbolKey::new(&self.name, &method.name, &method.descriptor)
    }

    pub fn field_key(&self, field: &FieldUnit) -> FieldRef {
        FieldRef::new(&self.name, &field.name, &field.descriptor)
    }
}

/// All classes of one build.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSnapshot {
    #[serde(default)]
    pub label: String,
    pub classes: Vec<ClassUnit>,
}

impl BuildSnapshot {
    pub fn new(label: impl Into<String>, classes: Vec<ClassUnit>) -> Self {
        Self {
            label: label.into(),
            classes,
        }
    }

    /// Every method of the build with its key, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = (SymbolKey, &ClassUnit, &MethodUnit)> + '_ {
        self.classes.iter().flat_map(|class| {
            class
                .methods
                .iter()
                .map(move |method| (class.method_key(method), class, method))
        })
    }

    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    /// Every declared field of the build with its key, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldRef, &FieldUnit)> + '_ {
        self.classes.iter().flat_map(|class| {
            class
                .fields
                .iter()
                .map(move |field| (class.field_key(field), field))
        })
    }
}

// ---------------------------------------------------------------------------
// Candidate matches
// ---------------------------------------------------------------------------

/// A scored guess that an old symbol corresponds to a new symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub old_key: SymbolKey,
    pub new_key: SymbolKey,
    /// Base structural similarity in `[0, 1]`.
    pub score: f64,
}

impl CandidateMatch {
    pub fn new(old_key: SymbolKey, new_key: SymbolKey, score: f64) -> Self {
        Self {
            old_key,
            new_key,
            score,
        }
    }
}

impl fmt::Display for CandidateMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} : {:.3}", self.old_key, self.new_key, self.score)
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// An injective `old -> new` relation together with its inverse.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    forward: IndexMap<SymbolKey, SymbolKey>,
    reverse: IndexMap<SymbolKey, SymbolKey>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping from pairs, rejecting any pair that would make it
    /// non-injective in either direction.
    pub fn from_pairs<I>(pairs: I) -> RemapResult<Self>
    where
        I: IntoIterator<Item = (SymbolKey, SymbolKey)>,
    {
        let mut mapping = Self::new();
        for (old, new) in pairs {
            mapping.insert(old, new)?;
        }
        Ok(mapping)
    }

    /// Insert a pair. Re-inserting an existing pair is a no-op.
    pub fn insert(&mut self, old: SymbolKey, new: SymbolKey) -> RemapResult<()> {
        if let Some(existing) = self.reverse.get(&new) {
            if *existing == old {
                return Ok(());
            }
            return Err(RemapError::Conflict {
                old,
                new,
                existing: existing.clone(),
            });
        }
        if let Some(previous) = self.forward.get(&old) {
            return Err(RemapError::Conflict {
                old: old.clone(),
                new,
                existing: previous.clone(),
            });
        }
        self.reverse.insert(new.clone(), old.clone());
        self.forward.insert(old, new);
        Ok(())
    }

    pub fn get(&self, old: &SymbolKey) -> Option<&SymbolKey> {
        self.forward.get(old)
    }

    pub fn get_inverse(&self, new: &SymbolKey) -> Option<&SymbolKey> {
        self.reverse.get(new)
    }

    pub fn contains_old(&self, old: &SymbolKey) -> bool {
        self.forward.contains_key(old)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolKey, &SymbolKey)> {
        self.forward.iter()
    }

    /// Pairs sorted by old key, independent of insertion order.
    pub fn sorted_pairs(&self) -> Vec<(&SymbolKey, &SymbolKey)> {
        let mut pairs: Vec<_> = self.forward.iter().collect();
        pairs.sort();
        pairs
    }

    /// SHA-256 hex digest of the canonical sorted `old -> new` listing.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (old, new) in self.sorted_pairs() {
            hasher.update(old.long_name().as_bytes());
            hasher.update(b" -> ");
            hasher.update(new.long_name().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Order-insensitive equality.
impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.forward == other.forward
    }
}

impl Eq for Mapping {}

// ---------------------------------------------------------------------------
// Seed mapping
// ---------------------------------------------------------------------------

/// One `(old, new)` assertion of a seed mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPair {
    pub old: SymbolKey,
    pub new: SymbolKey,
}

/// Externally supplied, non-authoritative partial mapping.
///
/// Several old keys may target the same new key; the refiner resolves such
/// conflicts by base score. Asserting the same old key twice keeps the later
/// assertion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SeedPair>", into = "Vec<SeedPair>")]
pub struct SeedMapping {
    pairs: IndexMap<SymbolKey, SymbolKey>,
}

impl SeedMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: SymbolKey, new: SymbolKey) {
        self.pairs.insert(old, new);
    }

    pub fn get(&self, old: &SymbolKey) -> Option<&SymbolKey> {
        self.pairs.get(old)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolKey, &SymbolKey)> {
        self.pairs.iter()
    }
}

impl FromIterator<(SymbolKey, SymbolKey)> for SeedMapping {
    fn from_iter<T: IntoIterator<Item = (SymbolKey, SymbolKey)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl From<&Mapping> for SeedMapping {
    fn from(mapping: &Mapping) -> Self {
        mapping
            .iter()
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect()
    }
}

impl From<Vec<SeedPair>> for SeedMapping {
    fn from(pairs: Vec<SeedPair>) -> Self {
        pairs.into_iter().map(|p| (p.old, p.new)).collect()
    }
}

impl From<SeedMapping> for Vec<SeedPair> {
    fn from(seed: SeedMapping) -> Self {
        seed.pairs
            .into_iter()
            .map(|(old, new)| SeedPair { old, new })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key(owner: &str, name: &str) -> SymbolKey {
        SymbolKey::new(owner, name, "()V")
    }

    #[test]
    fn test_symbol_key_display() {
        let k = SymbolKey::new("ab", "c", "(I)V");
        assert_eq!(k.to_string(), "ab.c(I)V");
        assert_eq!(k.long_name(), "ab.c(I)V");
    }

    #[test]
    fn test_field_access_direction() {
        let field = FieldRef::new("ab", "f", "I");
        assert_eq!(field.to_string(), "ab.f:I");
        let read = Instruction::with_operand("GETFIELD", Operand::Field(field.clone()));
        let write = Instruction::with_operand("PUTSTATIC", Operand::Field(field.clone()));
        assert_eq!(read.field_access(), Some((&field, false)));
        assert_eq!(write.field_access(), Some((&field, true)));
        assert_eq!(Instruction::new("RETURN").field_access(), None);
    }

    #[test]
    fn test_class_kind_from_access_flags() {
        assert_eq!(ClassKind::from_access_flags(0x0021), ClassKind::Ordinary);
        assert_eq!(ClassKind::from_access_flags(0x0601), ClassKind::Interface);
        assert_eq!(ClassKind::from_access_flags(0x2601), ClassKind::Annotation);
        assert_eq!(ClassKind::from_access_flags(0x4031), ClassKind::Enumerated);
    }

    #[test]
    fn test_mapping_rejects_duplicate_target() {
        let mut mapping = Mapping::new();
        mapping.insert(key("a", "x"), key("n", "x")).unwrap();
        let err = mapping.insert(key("a", "y"), key("n", "x")).unwrap_err();
        assert!(matches!(err, RemapError::Conflict { .. }));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_mapping_rejects_remapping_old_key() {
        let mut mapping = Mapping::new();
        mapping.insert(key("a", "x"), key("n", "x")).unwrap();
        assert!(mapping.insert(key("a", "x"), key("n", "y")).is_err());
        // Re-inserting the identical pair is fine.
        assert!(mapping.insert(key("a", "x"), key("n", "x")).is_ok());
    }

    #[test]
    fn test_mapping_inverse_lookup() {
        let mapping = Mapping::from_pairs(vec![(key("a", "x"), key("n", "x"))]).unwrap();
        assert_eq!(mapping.get_inverse(&key("n", "x")), Some(&key("a", "x")));
        assert_eq!(mapping.get(&key("a", "x")), Some(&key("n", "x")));
    }

    #[test]
    fn test_mapping_digest_ignores_insertion_order() {
        let first = Mapping::from_pairs(vec![
            (key("a", "x"), key("n", "x")),
            (key("a", "y"), key("n", "y")),
        ])
        .unwrap();
        let second = Mapping::from_pairs(vec![
            (key("a", "y"), key("n", "y")),
            (key("a", "x"), key("n", "x")),
        ])
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);
    }

    #[test]
    fn test_seed_mapping_later_assertion_wins() {
        let seed: SeedMapping = vec![
            (key("a", "x"), key("n", "x")),
            (key("a", "x"), key("n", "y")),
        ]
        .into_iter()
        .collect();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed.get(&key("a", "x")), Some(&key("n", "y")));
    }

    #[test]
    fn test_method_unit_has_code() {
        let mut method = MethodUnit {
            name: "a".to_string(),
            descriptor: "()V".to_string(),
            is_static: false,
            is_abstract: true,
            instructions: vec![Instruction::new("RETURN")],
        };
        assert!(!method.has_code());
        method.is_abstract = false;
        assert!(method.has_code());
        method.instructions.clear();
        assert!(!method.has_code());
    }

    #[test]
    fn test_instruction_accessors() {
        let ldc = Instruction::with_operand("LDC", Operand::Text("hello".to_string()));
        assert_eq!(ldc.text_constant(), Some("hello"));
        assert!(ldc.invoked().is_none());
        let call = Instruction::with_operand("INVOKESTATIC", Operand::Method(key("a", "b")));
        assert_eq!(call.invoked(), Some(&key("a", "b")));
    }
}
