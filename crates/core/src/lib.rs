//! The core crate of readwebform.
//!
//! `readwebform_core` stands up a single-use, ephemeral HTTP/HTTPS server
//! that serves one HTML form, waits for exactly one valid submission (or a
//! deadline), hands the decoded fields and stored uploads back to the
//! caller, and shuts down cleanly — even when a browser holds idle
//! keep-alive connections to the listener.
//!
//! The typical flow:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use readwebform_core::{FormServer, RunConfig, ServeOutcome};
//!
//! # #[tokio::main]
//! # async fn main() -> readwebform_core::Result<()> {
//! let config = RunConfig::new("127.0.0.1").timeout(Duration::from_secs(300));
//! let mut server = FormServer::new(config)?;
//!
//! // The served document must post to the minted endpoint and carry the
//! // minted CSRF token as a hidden `_csrf_token` field.
//! let html = format!(
//!     "<form action=\"{}\" method=\"POST\">\
//!      <input type=\"hidden\" name=\"_csrf_token\" value=\"{}\">\
//!      <input name=\"x\"><button>Submit</button></form>",
//!     server.endpoint(),
//!     server.csrf_token(),
//! );
//! server.set_html(html);
//!
//! let bound = server.bind().await?;
//! println!("listening on {}", bound.url());
//! match bound.serve(None).await {
//!     ServeOutcome::Submitted(form) => println!("got {} fields", form.fields.len()),
//!     ServeOutcome::TimedOut => println!("nobody answered"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod browser;
mod deadline;
mod error;
pub mod form;
mod handler;
pub mod limits;
pub mod server;
pub mod storage;
mod token;
pub mod tls;

pub use self::browser::BrowserLaunch;
pub use self::error::Error;
pub use self::form::{DecodeError, FormData, UploadedFile};
pub use self::limits::parse_size_limit;
pub use self::server::{BoundServer, FormServer, RunConfig, ServeOutcome, SubmittedForm};
pub use self::storage::StoredFile;
pub use self::tls::Keycert;

/// Result type which has [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;
