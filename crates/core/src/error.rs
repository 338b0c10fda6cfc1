//! Error types for server startup and the run lifecycle.
//!
//! Request-level failures (malformed bodies, size caps, CSRF mismatches)
//! never surface here; they are answered over HTTP and the run continues.
//! The variants below are the conditions that end or prevent a run.

use std::io::Error as IoError;

use thiserror::Error;

/// Errors that can abort a run before a submission was collected.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Binding the listening socket failed, usually because the port is
    /// already in use or the host address is not local.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The `host:port` pair that was requested.
        addr: String,
        /// The underlying socket error.
        source: IoError,
    },

    /// Loading the TLS certificate chain or private key failed. The
    /// listening socket has already been closed when this is returned.
    #[error("tls configuration failed: {0}")]
    TlsConfig(#[source] IoError),

    /// Any other I/O error, such as a failure to create the upload
    /// directory.
    #[error("i/o error: {0}")]
    Io(#[from] IoError),
}
