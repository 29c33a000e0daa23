//! Type patterns deciding which actions a logic descriptor applies to.

use std::fmt;

use regex::Regex;

use crate::error::{KyroResult, ValidationError};

/// Wildcard label matching every action type.
pub const WILDCARD: &str = "*";

/// Matches an action's type label.
///
/// # Examples
///
/// ```
/// use kyrologic::TypeMatcher;
///
/// assert!(TypeMatcher::from("*").matches("ANYTHING"));
/// assert!(TypeMatcher::exact("DEC").unwrap().matches("DEC"));
/// assert!(!TypeMatcher::exact("DEC").unwrap().matches("INC"));
/// assert!(TypeMatcher::regex("^USER_").unwrap().matches("USER_LOGIN"));
/// ```
#[derive(Debug, Clone)]
pub enum TypeMatcher {
    /// Universal wildcard (`*`).
    Any,
    /// Exact type equality.
    Exact(String),
    /// Matches when any member matches.
    OneOf(Vec<TypeMatcher>),
    /// Regular expression over the type label.
    Regex(Regex),
}

impl TypeMatcher {
    /// Exact match on `action_type`; `"*"` yields the wildcard.
    pub fn exact(action_type: impl Into<String>) -> KyroResult<Self> {
        let action_type = action_type.into();
        if action_type.trim().is_empty() {
            return Err(ValidationError::EmptyPattern.into());
        }
        if action_type == WILDCARD {
            return Ok(Self::Any);
        }
        Ok(Self::Exact(action_type))
    }

    /// Regular-expression match.
    pub fn regex(pattern: &str) -> KyroResult<Self> {
        Regex::new(pattern).map(Self::Regex).map_err(|e| {
            ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Matches any of `types`.
    pub fn one_of<I, T>(types: I) -> KyroResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let members = types
            .into_iter()
            .map(Self::exact)
            .collect::<KyroResult<Vec<_>>>()?;
        if members.is_empty() {
            return Err(ValidationError::EmptyPattern.into());
        }
        Ok(Self::OneOf(members))
    }

    /// Returns true when `action_type` is selected by this pattern.
    #[must_use]
    pub fn matches(&self, action_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(t) => t == action_type,
            Self::OneOf(members) => members.iter().any(|m| m.matches(action_type)),
            Self::Regex(re) => re.is_match(action_type),
        }
    }

    /// Rejects patterns that can never be registered.
    pub(crate) fn validate(&self) -> KyroResult<()> {
        match self {
            Self::Exact(t) if t.trim().is_empty() => Err(ValidationError::EmptyPattern.into()),
            Self::OneOf(members) if members.is_empty() => Err(ValidationError::EmptyPattern.into()),
            Self::OneOf(members) => members.iter().try_for_each(Self::validate),
            _ => Ok(()),
        }
    }

    /// Tracing name of a descriptor registered at `index`, e.g. `L(DEC)-0`.
    #[must_use]
    pub fn logic_name(&self, index: usize) -> String {
        format!("L({self})-{index}")
    }
}

impl fmt::Display for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Exact(t) => f.write_str(t),
            Self::OneOf(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for TypeMatcher {
    /// `"*"` is the wildcard; anything else is an exact match.
    ///
    /// An empty string is accepted here and rejected when the descriptor
    /// is built.
    fn from(action_type: &str) -> Self {
        if action_type == WILDCARD {
            Self::Any
        } else {
            Self::Exact(action_type.to_string())
        }
    }
}
