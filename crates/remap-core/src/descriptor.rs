//! Method type-signature parsing (`(ILfoo;[J)V` style descriptors).
//!
//! Obfuscation renames classes, so anything name-bearing inside a descriptor
//! is only comparable across builds after erasure. Library class names
//! survive obfuscation and are kept.

use std::sync::LazyLock;

use regex::Regex;

static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[*(?:[BCDFIJSZV]|L[^;]+;)").unwrap());

static CLASS_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"L([^;]+);").unwrap());

/// Argument and return types of a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    pub arguments: Vec<&'a str>,
    pub return_type: &'a str,
}

/// Split a descriptor into argument and return types. Returns `None` when the
/// text is not a well-formed descriptor.
pub fn parse(descriptor: &str) -> Option<MethodDescriptor<'_>> {
    let rest = descriptor.strip_prefix('(')?;
    let close = rest.find(')')?;
    let (params, tail) = rest.split_at(close);
    let return_type = &tail[1..];

    let mut arguments = Vec::new();
    let mut cursor = 0;
    for m in TYPE_RE.find_iter(params) {
        if m.start() != cursor {
            return None;
        }
        arguments.push(m.as_str());
        cursor = m.end();
    }
    if cursor != params.len() {
        return None;
    }

    let ret = TYPE_RE.find(return_type)?;
    if ret.start() != 0 || ret.end() != return_type.len() {
        return None;
    }
    Some(MethodDescriptor {
        arguments,
        return_type,
    })
}

/// Replace every class reference whose name satisfies `is_local` with `L;`.
pub fn erase_classes<F>(descriptor: &str, is_local: F) -> String
where
    F: Fn(&str) -> bool,
{
    CLASS_REF_RE
        .replace_all(descriptor, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            if is_local(name) {
                "L;".to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn array_depth(type_desc: &str) -> usize {
    type_desc.bytes().take_while(|&b| b == b'[').count()
}

fn is_reference(element: &str) -> bool {
    element.starts_with('L')
}

/// Same arity, and every argument agrees on array depth and on
/// primitive-vs-reference element type. Malformed descriptors are only
/// compatible with an identical string.
pub fn compatible_arguments(a: &str, b: &str) -> bool {
    let (Some(left), Some(right)) = (parse(a), parse(b)) else {
        return a == b;
    };
    if left.arguments.len() != right.arguments.len() {
        return false;
    }
    left.arguments
        .iter()
        .zip(right.arguments.iter())
        .all(|(x, y)| {
            let depth = array_depth(x);
            if depth != array_depth(y) {
                return false;
            }
            let (ex, ey) = (&x[depth..], &y[depth..]);
            is_reference(ex) == is_reference(ey)
        })
}
