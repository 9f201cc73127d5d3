//! Class, method and field candidate matching.

pub mod classes;
pub mod fields;
pub mod methods;

pub use classes::{greedy_one_to_one, match_classes_top_k, owner_context, ClassMatch};
pub use fields::{match_fields, FieldMatch, FieldOptions};
pub use methods::{match_methods_top_k, MatchOptions};
