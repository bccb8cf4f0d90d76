//! Comma-separated `key=value` selectors shared by both resolution layers.
//!
//! The same grammar describes two vocabularies:
//! - coarse terms consumed cluster-side (`node=`, `pod=`, `pod-uid=`,
//!   `container=`), wrapped by [`TargetSelector`];
//! - fine terms consumed on the target host (`pid=`, `exe=`, `comm=`,
//!   `cmdline=`), wrapped by [`ProcessSelector`].
//!
//! Keys and values are trimmed of surrounding whitespace, keys are
//! case-sensitive and unknown terms are preserved, so both views can wrap the
//! same query string without coordinating.

use std::{collections::BTreeMap, fmt, str::FromStr};

use thiserror::Error;

const NODE: &str = "node";
const POD: &str = "pod";
const POD_UID: &str = "pod-uid";
const CONTAINER: &str = "container";

const PID: &str = "pid";
const EXE: &str = "exe";
const COMM: &str = "comm";
const CMDLINE: &str = "cmdline";

/// Sentinel `pid` value asking for the most recently spawned process
/// instead of a specific namespace-local id.
pub const PID_LAST: &str = "last";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid term in selector at '{term}'")]
    InvalidTerm { term: String },
}

/// An immutable set of `key=value` terms.
///
/// Terms are held ordered by key, so [`Selector::to_query`] is deterministic
/// no matter the order the input spelled them in. Duplicate keys keep the
/// last value seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    terms: BTreeMap<String, String>,
}

impl Selector {
    /// Parses a `k=v[,k=v...]` query. Blank input is the empty selector.
    ///
    /// Every comma-separated term must contain exactly one `=`; anything
    /// else fails, naming the offending fragment.
    pub fn parse(query: &str) -> Result<Self, SelectorError> {
        let mut terms = BTreeMap::new();
        if query.trim().is_empty() {
            return Ok(Self { terms });
        }
        for term in query.split(',') {
            let parts: Vec<&str> = term.split('=').collect();
            let &[key, value] = parts.as_slice() else {
                return Err(SelectorError::InvalidTerm {
                    term: term.to_string(),
                });
            };
            terms.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { terms })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.terms.get(key).map(String::as_str)
    }

    /// Derives a new selector with `key=value` added, replacing any
    /// existing term for the same key.
    #[must_use]
    pub fn with_term(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &str)> {
        self.terms.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Serializes back to the query grammar, terms ordered by key.
    pub fn to_query(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Coarse view of a [`Selector`]: the terms describing a cluster target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSelector(Selector);

impl TargetSelector {
    pub fn parse(query: &str) -> Result<Self, SelectorError> {
        Selector::parse(query).map(Self)
    }

    pub fn node(&self) -> Option<&str> {
        self.0.get(NODE)
    }

    pub fn pod(&self) -> Option<&str> {
        self.0.get(POD)
    }

    pub fn pod_uid(&self) -> Option<&str> {
        self.0.get(POD_UID)
    }

    pub fn container(&self) -> Option<&str> {
        self.0.get(CONTAINER)
    }

    #[must_use]
    pub fn with_node(self, node: impl Into<String>) -> Self {
        Self(self.0.with_term(NODE, node))
    }

    #[must_use]
    pub fn with_pod(self, pod: impl Into<String>) -> Self {
        Self(self.0.with_term(POD, pod))
    }

    #[must_use]
    pub fn with_pod_uid(self, pod_uid: impl Into<String>) -> Self {
        Self(self.0.with_term(POD_UID, pod_uid))
    }

    #[must_use]
    pub fn with_container(self, container: impl Into<String>) -> Self {
        Self(self.0.with_term(CONTAINER, container))
    }

    pub fn as_selector(&self) -> &Selector {
        &self.0
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fine view of a [`Selector`]: the terms narrowing down a process within
/// an already-resolved container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSelector(Selector);

impl ProcessSelector {
    pub fn parse(query: &str) -> Result<Self, SelectorError> {
        Selector::parse(query).map(Self)
    }

    /// Namespace-local pid term, either a specific id or [`PID_LAST`].
    pub fn pid(&self) -> Option<&str> {
        self.0.get(PID)
    }

    pub fn exe(&self) -> Option<&str> {
        self.0.get(EXE)
    }

    pub fn comm(&self) -> Option<&str> {
        self.0.get(COMM)
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.0.get(CMDLINE)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_selector(&self) -> &Selector {
        &self.0
    }
}

impl fmt::Display for ProcessSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
