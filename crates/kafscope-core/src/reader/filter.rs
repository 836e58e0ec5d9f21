//! Client-side record filtering.
//!
//! The key filter takes precedence: when its mode is set it alone decides,
//! and the value filter is not consulted.

use super::types::{FieldFilter, Filter, MatchMode};

impl FieldFilter {
    /// Returns `true` if the mode is off.
    #[must_use]
    pub fn is_off(&self) -> bool {
        self.mode == MatchMode::None
    }

    /// Applies the predicate to `text`. An off filter matches everything.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self.mode {
            MatchMode::None => true,
            MatchMode::Contains => text.contains(self.term.as_str()),
            MatchMode::StartsWith => text.starts_with(self.term.as_str()),
        }
    }
}

impl Filter {
    /// Key-only filter.
    #[must_use]
    pub fn key(mode: MatchMode, term: impl Into<String>) -> Self {
        Self {
            key: FieldFilter::new(mode, term),
            value: FieldFilter::default(),
        }
    }

    /// Value-only filter.
    #[must_use]
    pub fn value(mode: MatchMode, term: impl Into<String>) -> Self {
        Self {
            key: FieldFilter::default(),
            value: FieldFilter::new(mode, term),
        }
    }

    /// Decides whether a record with the given decoded key and value is
    /// delivered.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        if !self.key.is_off() {
            return self.key.matches(key);
        }
        if self.value.is_off() || self.value.term.is_empty() {
            return true;
        }
        self.value.matches(value)
    }
}
