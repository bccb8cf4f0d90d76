//! The tracing systems a trace job can execute.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown tracer '{0}', expected one of bpftrace, bcc, rbspy, fake")]
pub struct UnknownTracer(pub String);

/// Tracer kinds shared between the operator CLI, which validates and ships
/// them in the job command line, and the node runner, which executes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tracer {
    #[default]
    Bpftrace,
    Bcc,
    Rbspy,
    Fake,
}

impl Tracer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tracer::Bpftrace => "bpftrace",
            Tracer::Bcc => "bcc",
            Tracer::Rbspy => "rbspy",
            Tracer::Fake => "fake",
        }
    }

    /// rbspy cannot pick a process on its own; the selector must pin one
    /// through a `pid` term.
    pub fn requires_pid_selector(&self) -> bool {
        matches!(self, Tracer::Rbspy)
    }
}

impl fmt::Display for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tracer {
    type Err = UnknownTracer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bpftrace" => Ok(Tracer::Bpftrace),
            "bcc" => Ok(Tracer::Bcc),
            "rbspy" => Ok(Tracer::Rbspy),
            "fake" => Ok(Tracer::Fake),
            other => Err(UnknownTracer(other.to_string())),
        }
    }
}
