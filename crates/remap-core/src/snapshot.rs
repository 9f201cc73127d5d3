//! JSON interchange for build snapshots, call graphs, seeds, configs and
//! reports.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::RemapConfig;
use crate::errors::{RemapError, RemapResult};
use crate::graph::CallGraph;
use crate::models::{BuildSnapshot, SeedMapping};
use crate::pipeline::RemapReport;

fn read_json<T: DeserializeOwned>(path: &Path) -> RemapResult<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RemapResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Reject snapshots that would make symbol keys ambiguous.
pub fn validate_snapshot(snapshot: &BuildSnapshot) -> RemapResult<()> {
    let mut classes: HashSet<&str> = HashSet::new();
    for class in &snapshot.classes {
        if class.name.is_empty() {
            return Err(RemapError::Snapshot(format!(
                "{}: class with empty name",
                snapshot.label
            )));
        }
        if !classes.insert(class.name.as_str()) {
            return Err(RemapError::Snapshot(format!(
                "{}: duplicate class {}",
                snapshot.label, class.name
            )));
        }
        let mut methods: HashSet<(&str, &str)> = HashSet::new();
        for method in &class.methods {
            if !methods.insert((method.name.as_str(), method.descriptor.as_str())) {
                return Err(RemapError::Snapshot(format!(
                    "{}: duplicate method {}",
                    snapshot.label,
                    class.method_key(method)
                )));
            }
        }
        let mut fields: HashSet<(&str, &str)> = HashSet::new();
        for field in &class.fields {
            if !fields.insert((field.name.as_str(), field.descriptor.as_str())) {
                return Err(RemapError::Snapshot(format!(
                    "{}: duplicate field {}",
                    snapshot.label,
                    class.field_key(field)
                )));
            }
        }
    }
    Ok(())
}

pub fn load_snapshot(path: &Path) -> RemapResult<BuildSnapshot> {
    let snapshot: BuildSnapshot = read_json(path)?;
    validate_snapshot(&snapshot)?;
    debug!(
        "Loaded snapshot {} ({} classes, {} methods)",
        snapshot.label,
        snapshot.classes.len(),
        snapshot.method_count()
    );
    Ok(snapshot)
}

pub fn save_snapshot(path: &Path, snapshot: &BuildSnapshot) -> RemapResult<()> {
    validate_snapshot(snapshot)?;
    write_json(path, snapshot)
}

pub fn load_call_graph(path: &Path) -> RemapResult<CallGraph> {
    read_json(path)
}

pub fn save_call_graph(path: &Path, graph: &CallGraph) -> RemapResult<()> {
    write_json(path, graph)
}

pub fn load_seed(path: &Path) -> RemapResult<SeedMapping> {
    read_json(path)
}

pub fn save_seed(path: &Path, seed: &SeedMapping) -> RemapResult<()> {
    write_json(path, seed)
}

/// Load a configuration file and validate it. Missing fields take defaults.
pub fn load_config(path: &Path) -> RemapResult<RemapConfig> {
    let config: RemapConfig = read_json(path)?;
    config.validate()?;
    Ok(config)
}

pub fn load_report(path: &Path) -> RemapResult<RemapReport> {
    read_json(path)
}

pub fn save_report(path: &Path, report: &RemapReport) -> RemapResult<()> {
    write_json(path, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClassKind, ClassUnit, FieldUnit, Instruction, MethodUnit, Operand, SymbolKey,
    };
    use crate::pipeline::{remap, BuildInput};

    fn sample() -> BuildSnapshot {
        BuildSnapshot::new(
            "v1",
            vec![ClassUnit {
                name: "ab".to_string(),
                kind: ClassKind::Ordinary,
                super_name: Some("java/lang/Object".to_string()),
                interfaces: vec![],
                methods: vec![
                    MethodUnit {
                        name: "a".to_string(),
                        descriptor: "()V".to_string(),
                        is_static: true,
                        is_abstract: false,
                        instructions: vec![
                            Instruction::with_operand("LDC", Operand::Text("hi".to_string())),
                            Instruction::with_operand(
                                "INVOKESTATIC",
                                Operand::Method(SymbolKey::new("ab", "b", "()V")),
                            ),
                        ],
                    },
                    MethodUnit {
                        name: "b".to_string(),
                        descriptor: "()V".to_string(),
                        is_static: true,
                        is_abstract: false,
                        instructions: vec![Instruction::new("RETURN")],
                    },
                ],
                fields: vec![],
            }],
        )
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("v1.json");
        save_snapshot(&path, &sample()).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), sample());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut snapshot = sample();
        snapshot.classes.push(snapshot.classes[0].clone());
        let err = validate_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, RemapError::Snapshot(_)));
        assert!(err.to_string().contains("duplicate class ab"));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let mut snapshot = sample();
        let copy = snapshot.classes[0].methods[0].clone();
        snapshot.classes[0].methods.push(copy);
        assert!(validate_snapshot(&snapshot).is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut snapshot = sample();
        let field = FieldUnit {
            name: "f".to_string(),
            descriptor: "I".to_string(),
            is_static: false,
            is_final: true,
        };
        snapshot.classes[0].fields = vec![field.clone(), field];
        let err = validate_snapshot(&snapshot).unwrap_err();
        assert!(err.to_string().contains("duplicate field ab.f:I"));
    }

    #[test]
    fn test_field_flags_default_when_absent() {
        let field: FieldUnit = serde_json::from_str(r#"{"name": "f", "descriptor": "J"}"#).unwrap();
        assert!(!field.is_static);
        assert!(!field.is_final);
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_snapshot(&path), Err(RemapError::Json(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(load_seed(&missing), Err(RemapError::Io(_))));
    }

    #[test]
    fn test_seed_and_graph_files() {
        let dir = tempfile::tempdir().unwrap();
        let seed: SeedMapping = [(
            SymbolKey::new("ab", "a", "()V"),
            SymbolKey::new("zz", "q", "()V"),
        )]
        .into_iter()
        .collect();
        let seed_path = dir.path().join("seed.json");
        save_seed(&seed_path, &seed).unwrap();
        assert_eq!(load_seed(&seed_path).unwrap(), seed);

        let graph = CallGraph::extract(&sample(), true);
        let graph_path = dir.path().join("graph.json");
        save_call_graph(&graph_path, &graph).unwrap();
        let loaded = load_call_graph(&graph_path).unwrap();
        assert_eq!(loaded.edge_count(), 1);
        assert!(loaded
            .callers(&SymbolKey::new("ab", "b", "()V"))
            .unwrap()
            .contains(&SymbolKey::new("ab", "a", "()V")));
    }

    #[test]
    fn test_config_file_validated() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        fs::write(&good, r#"{"top_k": 8}"#).unwrap();
        assert_eq!(load_config(&good).unwrap().top_k, 8);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"class_weight": 2.0}"#).unwrap();
        assert!(matches!(load_config(&bad), Err(RemapError::InvalidConfig(_))));
    }

    #[test]
    fn test_report_file_round_trip() {
        let input = BuildInput::from_snapshot(sample());
        let report = remap(&input, &input, &SeedMapping::new(), &RemapConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        save_report(&path, &report).unwrap();
        let loaded = load_report(&path).unwrap();
        assert_eq!(loaded.digest, report.digest);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.mapping().unwrap(), report.mapping().unwrap());
    }
}
