//! Secondary reporting channel, e.g. a third-party tag's `gtag` function

use crate::error::MirrorError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorCommand {
    Event,
    Config,
}

impl MirrorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorCommand::Event => "event",
            MirrorCommand::Config => "config",
        }
    }
}

impl std::fmt::Display for MirrorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub trait Mirror: Send + Sync {
    fn emit(&self, command: MirrorCommand, identifier: &str, params: &Value) -> Result<(), MirrorError>;
}

/// Mirror used when no reporting function is present
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMirror;

impl Mirror for NullMirror {
    fn emit(&self, _command: MirrorCommand, _identifier: &str, _params: &Value) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// Wraps an externally supplied reporting function
pub struct FnMirror<F> {
    report: F,
}

impl<F> FnMirror<F>
where
    F: Fn(MirrorCommand, &str, &Value) -> Result<(), MirrorError> + Send + Sync,
{
    pub fn new(report: F) -> Self {
        Self { report }
    }
}

impl<F> Mirror for FnMirror<F>
where
    F: Fn(MirrorCommand, &str, &Value) -> Result<(), MirrorError> + Send + Sync,
{
    fn emit(&self, command: MirrorCommand, identifier: &str, params: &Value) -> Result<(), MirrorError> {
        (self.report)(command, identifier, params)
    }
}
