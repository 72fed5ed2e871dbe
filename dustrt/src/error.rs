//! Error types shared by all subsystems of the engine.

use std::backtrace::Backtrace;
use std::fmt::{self, Display, Formatter};
use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid property value, missing required attribute, or structural
    /// mismatch in the configuration. Raised at setup; the simulation
    /// never starts.
    #[error("configuration error: {0}")]
    Config(String),
    /// Missing or malformed resource file. Raised at setup.
    #[error("resource error in '{}': {reason}", path.display())]
    Resource {
        /// Path of the offending resource file.
        path: PathBuf,
        /// What went wrong while reading it.
        reason: String,
    },
    /// Oversize envelope, unexpected tag, or wrong-thread invocation in
    /// the task farm.
    #[error("task farm error: {0}")]
    Farm(String),
    /// Invariant violation at run time, carrying structured context.
    #[error("{0}")]
    Fatal(Box<FatalError>),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Constructs a fatal error from a (possibly multi-line) message,
    /// capturing the caller's source location and a stack snapshot.
    #[track_caller]
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(Box::new(FatalError::new(message.into())))
    }
}

/// Structured payload of a fatal run-time error: a message list, the
/// originating source location, and a captured back-trace.
#[derive(Debug)]
pub struct FatalError {
    messages: Vec<String>,
    location: &'static Location<'static>,
    backtrace: Backtrace,
}

impl FatalError {
    #[track_caller]
    fn new(message: String) -> Self {
        let mut messages: Vec<String> = message
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect();
        if messages.is_empty() {
            messages.push("Unknown error".to_owned());
        }
        Self {
            messages,
            location: Location::caller(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Returns the message lines, first line nonempty.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Returns the source location where the error was raised.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns the stack snapshot captured when the error was raised.
    #[must_use]
    pub const fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}:{})",
            self.messages[0],
            self.location.file(),
            self.location.line()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_splits_message_lines() {
        let err = Error::fatal("first line\nsecond line");
        let Error::Fatal(fatal) = err else {
            panic!("expected a fatal error");
        };
        assert_eq!(fatal.messages().len(), 2);
        assert_eq!(fatal.messages()[0], "first line");
        assert!(fatal.location().file().ends_with("error.rs"));
    }

    #[test]
    fn fatal_empty_message_is_unknown() {
        let err = Error::fatal("");
        let Error::Fatal(fatal) = err else {
            panic!("expected a fatal error");
        };
        assert_eq!(fatal.messages()[0], "Unknown error");
    }
}
