//! System-side error types.

use modecs_component::QueryError;

/// Errors raised while a system accesses its params.
///
/// Returned through the system function with `?`, these become a
/// [`SystemTrap`] and abort the current invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemError {
    /// The system asked for commands without calling `add_commands`.
    #[error("system '{system}' did not declare a Commands param")]
    CommandsNotDeclared {
        /// The offending system.
        system: String,
    },

    /// The system asked for a query it never declared.
    #[error("system '{system}' requested query {index} but declared {declared}")]
    QueryNotDeclared {
        /// The offending system.
        system: String,
        /// Requested query index.
        index: usize,
        /// Number of declared queries.
        declared: usize,
    },

    /// Reading or writing a query result failed.
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// An unrecoverable fault that aborted one system invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemTrap {
    /// The system function returned an error.
    #[error("system '{system}' trapped: {message}")]
    Failed {
        /// The trapped system.
        system: String,
        /// Rendered error chain.
        message: String,
    },

    /// The system wrote through a query result it only declared `Ref` for.
    ///
    /// Raised even if the system swallowed the error returned by `set`.
    #[error("system '{system}' made an illegal access: {error}")]
    IllegalAccess {
        /// The trapped system.
        system: String,
        /// The first illegal access.
        error: QueryError,
    },

    /// The system function panicked.
    #[error("system '{system}' panicked: {message}")]
    Panicked {
        /// The trapped system.
        system: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl SystemTrap {
    /// Name of the system that trapped.
    #[must_use]
    pub fn system(&self) -> &str {
        match self {
            Self::Failed { system, .. }
            | Self::IllegalAccess { system, .. }
            | Self::Panicked { system, .. } => system,
        }
    }
}
