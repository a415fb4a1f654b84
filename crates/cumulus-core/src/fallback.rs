//! Fallback policies for anticipated error responses.
//!
//! A [`FallbackPolicy`] names the status codes on which an operation substitutes a
//! value (`false`, absent, or unit) instead of failing, or decodes the provider's
//! error object and raises it.

use std::collections::BTreeSet;

use tracing::debug;

use crate::response::Resolved;

/// What to do when a trigger status is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    /// Decode the error body and raise it as [`crate::Error::ProviderError`]
    PropagateError,
    /// Return `false`
    SubstituteFalse,
    /// Return an absent value
    SubstituteNull,
    /// Return unit
    SubstituteVoid,
}

/// Fallback kind qualified by its trigger status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    kind: FallbackKind,
    triggers: BTreeSet<u16>,
    body_marker: Option<String>,
}

impl FallbackPolicy {
    /// Propagate errors with no decoded error object: every non-2xx status is unexpected.
    #[must_use]
    pub const fn propagate() -> Self {
        Self {
            kind: FallbackKind::PropagateError,
            triggers: BTreeSet::new(),
            body_marker: None,
        }
    }

    /// Decode the error body into a provider error on the given statuses.
    #[must_use]
    pub fn propagate_on(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::with_kind(FallbackKind::PropagateError, statuses)
    }

    /// Substitute `false` on the given statuses.
    #[must_use]
    pub fn false_on(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::with_kind(FallbackKind::SubstituteFalse, statuses)
    }

    /// Substitute an absent value on the given statuses.
    #[must_use]
    pub fn null_on(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::with_kind(FallbackKind::SubstituteNull, statuses)
    }

    /// Substitute unit on the given statuses.
    #[must_use]
    pub fn void_on(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::with_kind(FallbackKind::SubstituteVoid, statuses)
    }

    fn with_kind(kind: FallbackKind, statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            kind,
            triggers: statuses.into_iter().collect(),
            body_marker: None,
        }
    }

    /// Only trigger when the raw body contains `marker`.
    #[must_use]
    pub fn when_body_contains(mut self, marker: impl Into<String>) -> Self {
        self.body_marker = Some(marker.into());
        self
    }

    /// Fallback kind.
    #[must_use]
    pub const fn kind(&self) -> FallbackKind {
        self.kind
    }

    /// Trigger status codes.
    #[must_use]
    pub const fn triggers(&self) -> &BTreeSet<u16> {
        &self.triggers
    }

    /// Optional body marker narrowing the trigger.
    #[must_use]
    pub fn body_marker(&self) -> Option<&str> {
        self.body_marker.as_deref()
    }

    /// Whether a response with this status and body triggers the fallback.
    ///
    /// The body is scanned for the marker bytes; it is never parsed.
    #[must_use]
    pub fn is_triggered(&self, status: u16, body: &[u8]) -> bool {
        if !self.triggers.contains(&status) {
            return false;
        }
        match self.body_marker.as_deref() {
            None | Some("") => true,
            Some(marker) => body
                .windows(marker.len())
                .any(|window| window == marker.as_bytes()),
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::propagate()
    }
}

/// Map a triggered fallback to its substitute value.
///
/// Returns `None` for [`FallbackKind::PropagateError`], which the caller turns into a
/// typed failure.
#[must_use]
pub fn substitute(status: u16, kind: FallbackKind) -> Option<Resolved> {
    let value = match kind {
        FallbackKind::PropagateError => return None,
        FallbackKind::SubstituteFalse => Resolved::Bool(false),
        FallbackKind::SubstituteNull => Resolved::Null,
        FallbackKind::SubstituteVoid => Resolved::Void,
    };
    debug!(status, ?kind, "Substituting fallback value");
    Some(value)
}
