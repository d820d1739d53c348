//! Unified, `miette`-based diagnostics for Veracity.
//!
//! # Overview
//!
//! Every way a verification call can be *broken* (as opposed to merely failing) is represented
//! by [`VerifyError`]. Outcomes that need a human to look at them, a missing baseline or a
//! changed snapshot, are not errors: they are reported as [`SnapshotStatus`] values inside an
//! `Ok(VerifyResult)`.
//!
//! # Error Construction Macros
//!
//! - **Use `err_msg!` for message-only errors.**
//!   - `err_msg!(Configuration, "invalid scrubber pattern '{}'", pattern)`
//!
//! - **Use `err_cause!` when an underlying error caused the failure.**
//!   - `err_cause!(Io, e, "failed to read '{}'", path.display())`
//!
//! Never construct the variants by hand at call sites; the macros keep the `source` wiring
//! consistent.
//!
//! [`SnapshotStatus`]: crate::engine::SnapshotStatus

use miette::Diagnostic;
use thiserror::Error;

/// Boxed cause attached to a [`VerifyError`].
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Type-safe classification of [`VerifyError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Two targets of one call resolve to the same file identity
    NamingCollision,
    /// A converter (registered or structural) failed to produce text
    Conversion,
    /// Malformed pattern or invalid settings combination
    Configuration,
    /// Reading or writing snapshot files failed
    Io,
    /// An archive could not be enumerated
    Archive,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::NamingCollision => "NamingCollision",
            ErrorType::Conversion => "Conversion",
            ErrorType::Configuration => "Configuration",
            ErrorType::Io => "Io",
            ErrorType::Archive => "Archive",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for every broken-setup failure mode.
#[derive(Debug, Error, Diagnostic)]
pub enum VerifyError {
    #[error("Naming collision: {message}")]
    #[diagnostic(
        code(veracity::naming::collision),
        help("give each target a distinct name or extension")
    )]
    NamingCollision {
        message: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("Conversion failed: {message}")]
    #[diagnostic(code(veracity::conversion::failed))]
    Conversion {
        message: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("Configuration error: {message}")]
    #[diagnostic(code(veracity::configuration::invalid))]
    Configuration {
        message: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("I/O error: {message}")]
    #[diagnostic(code(veracity::io))]
    Io {
        message: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("Archive error: {message}")]
    #[diagnostic(code(veracity::archive))]
    Archive {
        message: String,
        #[source]
        source: Option<Cause>,
    },
}

impl VerifyError {
    /// Returns the type-safe classification of this error.
    pub fn error_type(&self) -> ErrorType {
        match self {
            VerifyError::NamingCollision { .. } => ErrorType::NamingCollision,
            VerifyError::Conversion { .. } => ErrorType::Conversion,
            VerifyError::Configuration { .. } => ErrorType::Configuration,
            VerifyError::Io { .. } => ErrorType::Io,
            VerifyError::Archive { .. } => ErrorType::Archive,
        }
    }

    /// The human-readable message, without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            VerifyError::NamingCollision { message, .. }
            | VerifyError::Conversion { message, .. }
            | VerifyError::Configuration { message, .. }
            | VerifyError::Io { message, .. }
            | VerifyError::Archive { message, .. } => message,
        }
    }
}

/// Constructs a `VerifyError` variant with a formatted message and no cause.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $msg:expr) => {
        $crate::VerifyError::$variant {
            message: format!("{}", $msg),
            source: None,
        }
    };
    ($variant:ident, $fmt:expr, $($arg:expr),+ $(,)?) => {
        $crate::VerifyError::$variant {
            message: format!($fmt, $($arg),+),
            source: None,
        }
    };
}

/// Constructs a `VerifyError` variant with a formatted message and an underlying cause.
#[macro_export]
macro_rules! err_cause {
    ($variant:ident, $cause:expr, $msg:expr) => {
        $crate::VerifyError::$variant {
            message: format!("{}", $msg),
            source: Some(Box::new($cause)),
        }
    };
    ($variant:ident, $cause:expr, $fmt:expr, $($arg:expr),+ $(,)?) => {
        $crate::VerifyError::$variant {
            message: format!($fmt, $($arg),+),
            source: Some(Box::new($cause)),
        }
    };
}

#[cfg(test)]
mod diagnostics_tests {
    use miette::Report;

    use super::*;

    #[test]
    fn test_err_msg_formats_arguments() {
        let err = err_msg!(Configuration, "bad pattern '{}' at {}", "(", 3);
        assert_eq!(err.error_type(), ErrorType::Configuration);
        assert_eq!(err.message(), "bad pattern '(' at 3");
        assert_eq!(err.to_string(), "Configuration error: bad pattern '(' at 3");
    }

    #[test]
    fn test_error_chaining() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = err_cause!(Io, cause, "failed to read '{}'", "a.verified.txt");
        let report = Report::new(err);
        let output = format!("{report:?}");
        assert!(output.contains("a.verified.txt"));
        assert!(output.contains("gone"));
    }

    #[test]
    fn test_collision_carries_help() {
        let err = err_msg!(NamingCollision, "duplicate target 'txt'");
        let help = err.help().map(|h| h.to_string());
        assert_eq!(
            help.as_deref(),
            Some("give each target a distinct name or extension")
        );
    }
}
