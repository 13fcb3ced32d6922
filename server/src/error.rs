//! Error types for the Chorus server.
//!
//! # Error Types
//!
//! - [`HubError`] - The hub coordinator is no longer accepting commands
//! - [`ServerError`] - Top-level server errors surfaced by the binary
//!
//! Authentication failures are modelled separately by
//! [`AuthError`](crate::auth::AuthError) because they are answered with an
//! HTTP status rather than propagated.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by [`Hub`](crate::hub::Hub) handle operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The coordinator loop has stopped; no further events are processed.
    #[error("hub coordinator is not running")]
    Closed,
}

/// Top-level error type for the Chorus server.
///
/// Transport errors on individual connections never reach this type; they
/// end only the affected client.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error during server initialization.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

impl ServerError {
    /// Creates a new bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
