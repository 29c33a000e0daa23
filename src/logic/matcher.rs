//! Selects the descriptors that apply to an action.
//!
//! Selection is a stable filter over registration order. There is no
//! reordering by specificity: a wildcard registered first runs first.

use std::sync::Arc;

use crate::action::Action;

use super::descriptor::Logic;
use super::pattern::TypeMatcher;

/// Anything carrying a [`TypeMatcher`] can be matched.
pub trait Matchable {
    /// Pattern to test action types against.
    fn type_matcher(&self) -> &TypeMatcher;
}

impl<S> Matchable for Logic<S> {
    fn type_matcher(&self) -> &TypeMatcher {
        self.pattern()
    }
}

impl<T: Matchable + ?Sized> Matchable for Arc<T> {
    fn type_matcher(&self) -> &TypeMatcher {
        (**self).type_matcher()
    }
}

/// Returns the entries of `registered` whose pattern matches `action`,
/// in registration order.
#[must_use]
pub fn match_logic<T: Matchable + Clone>(action: &Action, registered: &[T]) -> Vec<T> {
    registered
        .iter()
        .filter(|entry| entry.type_matcher().matches(action.action_type()))
        .cloned()
        .collect()
}
