//! Warning and error side channel.
//!
//! Every diagnostic is kept in memory for callers to inspect and forwarded
//! to `tracing`. Warnings are not logged when the collector is silent; errors
//! always are.

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

/// A single diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

/// Collects diagnostics for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    silent: bool,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(silent: bool) -> Self {
        Self {
            silent,
            entries: Vec::new(),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let entry = Diagnostic::warning(message);
        if !self.silent {
            tracing::warn!("{}", entry.message);
        }
        self.entries.push(entry);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let entry = Diagnostic::error(message);
        tracing::error!("{}", entry.message);
        self.entries.push(entry);
    }

    /// Apply the required/optional policy to a failure.
    ///
    /// Required failures are recorded as errors and handed back to the caller
    /// to propagate; optional ones become warnings.
    pub fn report<E: std::fmt::Display>(&mut self, required: bool, failure: E) -> Result<(), E> {
        if required {
            self.error(failure.to_string());
            Err(failure)
        } else {
            self.warn(failure.to_string());
            Ok(())
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.level == Level::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.level == Level::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Append another collector's entries.
    pub fn absorb(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}
