//! Exchange State Tags
//!
//! The agent reports record state as a free-form string and is not consistent
//! about spelling: the same state shows up as `offer-received`,
//! `offer_received` or occasionally `Offer Received`. Every tag is folded to a
//! single canonical form before any policy lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical state tag (lowercase, `_`-separated)
///
/// Construction always goes through [`StateTag::new`], so two tags compare
/// equal iff they name the same remote state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StateTag(String);

impl StateTag {
    /// Canonicalize a raw tag
    pub fn new(raw: &str) -> Self {
        Self(canonicalize(raw))
    }

    /// Canonical string form
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty tag (agent sent no state)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateTag {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for StateTag {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<StateTag> for String {
    fn from(tag: StateTag) -> Self {
        tag.0
    }
}

/// Fold a raw state tag to canonical form.
///
/// Trims, lowercases, maps `-` and whitespace runs to a single `_` and strips
/// leading/trailing separators.
pub fn canonicalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for ch in raw.trim().chars() {
        if ch == '-' || ch == '_' || ch.is_whitespace() {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(ch.to_lowercase());
    }

    out
}
