//! Fingerprint extraction for whole builds.
//!
//! Each fingerprint depends only on one class's (or method's) own data, so
//! extraction runs in parallel across classes. Output keeps declaration order.

pub mod class;
pub mod method;
pub mod similarity;

use std::collections::HashSet;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::models::BuildSnapshot;

pub use class::{ClassBreakdown, ClassFingerprint};
pub use method::{MethodBreakdown, MethodFingerprint};

/// Class fingerprints keyed by class name, in declaration order.
pub fn fingerprint_classes(build: &BuildSnapshot) -> IndexMap<String, ClassFingerprint> {
    let fingerprints: Vec<ClassFingerprint> = build
        .classes
        .par_iter()
        .map(ClassFingerprint::extract)
        .collect();
    fingerprints
        .into_iter()
        .map(|fp| (fp.name.clone(), fp))
        .collect()
}

/// Fingerprints of every method of the build, in declaration order.
pub fn fingerprint_methods(build: &BuildSnapshot) -> Vec<MethodFingerprint> {
    let local: HashSet<&str> = build.classes.iter().map(|c| c.name.as_str()).collect();
    build
        .classes
        .par_iter()
        .flat_map_iter(|class| {
            let local = &local;
            class.methods.iter().map(move |method| {
                MethodFingerprint::extract(class.method_key(method), method, |name| {
                    local.contains(name)
                })
            })
        })
        .collect()
}
