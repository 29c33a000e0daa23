//! Logic descriptors and the matcher that selects them.

/// Descriptor type and builder.
pub mod descriptor;
/// Ordered selection of descriptors for an action.
pub mod matcher;
/// Type patterns and descriptor naming.
pub mod pattern;

pub use descriptor::{Logic, LogicBuilder, PhaseFn, PhaseKind};
pub use matcher::{match_logic, Matchable};
pub use pattern::{TypeMatcher, WILDCARD};
