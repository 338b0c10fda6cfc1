//! The ephemeral form server and its lifecycle controller.
//!
//! A run goes through three stages: [`FormServer::new`] mints the per-run
//! secrets and creates the upload directory, [`FormServer::bind`] claims
//! the socket (and the TLS acceptor, when configured) and fixes the
//! canonical URL, and [`BoundServer::serve`] accepts connections until
//! exactly one of two things happens — a valid submission or the deadline.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::browser::{self, BrowserLaunch};
use crate::deadline::Deadline;
use crate::error::Error;
use crate::handler::{self, HandlerContext};
use crate::storage::StoredFile;
use crate::tls::Keycert;
use crate::{Result, token};

/// How often a blocked accept wakes up to look for the shutdown signal.
/// Mandatory: without the periodic wakeup a quiet listener would only
/// notice the shutdown on the next connection attempt.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded wait for the accept loop to exit during shutdown; when
/// exceeded the task is aborted, which force-closes the socket.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Immutable per-run configuration, built by the caller.
#[derive(Debug, Clone)]
pub struct RunConfig {
    host: String,
    port: u16,
    tls: Option<(PathBuf, PathBuf)>,
    max_file_size: Option<u64>,
    max_total_size: Option<u64>,
    timeout: Duration,
    reset_timeout_on_error: bool,
}

impl RunConfig {
    /// Create a config binding `host` on an auto-selected free port, with
    /// a 300 second deadline that resets on recoverable errors and no
    /// upload limits.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 0,
            tls: None,
            max_file_size: None,
            max_total_size: None,
            timeout: Duration::from_secs(300),
            reset_timeout_on_error: true,
        }
    }

    /// Request a specific port instead of an auto-selected one.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve HTTPS using the PEM certificate chain and private key at the
    /// given paths. The material is loaded during [`FormServer::bind`].
    #[must_use]
    pub fn tls_paths(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some((cert.into(), key.into()));
        self
    }

    /// Cap the size of each uploaded file.
    #[must_use]
    pub fn max_file_size(mut self, limit: Option<u64>) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Cap the total request body size.
    #[must_use]
    pub fn max_total_size(mut self, limit: Option<u64>) -> Self {
        self.max_total_size = limit;
        self
    }

    /// Set the submission deadline. Must be positive.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether recoverable handler errors re-arm the deadline at its full
    /// duration.
    #[must_use]
    pub fn reset_timeout_on_error(mut self, reset: bool) -> Self {
        self.reset_timeout_on_error = reset;
        self
    }
}

/// A successful submission: decoded fields plus stored file metadata.
#[derive(Debug, Default)]
pub struct SubmittedForm {
    /// Field values in submission order; repeated names accumulate.
    pub fields: IndexMap<String, Vec<String>>,
    /// Stored files, keyed by field name.
    pub files: IndexMap<String, Vec<StoredFile>>,
}

/// What a finished run produced.
#[derive(Debug)]
pub enum ServeOutcome {
    /// Exactly one valid submission was collected.
    Submitted(SubmittedForm),
    /// The deadline fired before a valid submission arrived.
    TimedOut,
}

/// At-most-once holder for the run's outcome. The first writer wins;
/// every later fill is discarded, which is what makes a submission
/// arriving after the deadline invisible to the caller.
#[derive(Debug, Default)]
pub(crate) struct OutcomeCell(Mutex<Option<ServeOutcome>>);

impl OutcomeCell {
    /// Fill the cell if it is still empty. Returns whether this writer
    /// won.
    pub(crate) fn fill(&self, outcome: ServeOutcome) -> bool {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            true
        } else {
            false
        }
    }

    pub(crate) fn take(&self) -> Option<ServeOutcome> {
        self.0.lock().take()
    }
}

/// An ephemeral, single-use form server.
///
/// Construction mints the CSRF token and the random endpoint path and
/// creates the upload directory, so the caller can inject the token into
/// its HTML document before anything is served.
#[derive(Debug)]
pub struct FormServer {
    config: RunConfig,
    csrf_token: String,
    endpoint: String,
    upload_dir: PathBuf,
    html: String,
}

impl FormServer {
    /// Create a server for one run. The upload directory
    /// (`readwebform_<random>` under the OS temp root) is created here,
    /// before any socket exists, and is never removed by this crate.
    pub fn new(config: RunConfig) -> Result<Self> {
        let upload_dir = tempfile::Builder::new()
            .prefix("readwebform_")
            .tempdir()?
            .keep();
        Ok(Self {
            config,
            csrf_token: token::csrf_token(),
            endpoint: token::endpoint_path(),
            upload_dir,
            html: String::new(),
        })
    }

    /// The per-run CSRF token, to be injected into the served form as the
    /// hidden `_csrf_token` field.
    #[must_use]
    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// The per-run endpoint path the form must post to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Directory uploaded files are stored under.
    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Attach the document to serve. It must already carry the endpoint
    /// as its form action and the CSRF token as a hidden field; the
    /// server does not re-validate this.
    pub fn set_html(&mut self, html: impl Into<String>) {
        self.html = html.into();
    }

    /// Bind the listening socket, load the TLS material when configured,
    /// and fix the canonical URL. TLS failures close the listener before
    /// returning.
    pub async fn bind(self) -> Result<BoundServer> {
        let requested = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| Error::Bind {
                addr: requested,
                source,
            })?;
        let port = listener.local_addr()?.port();

        let tls_acceptor = match &self.config.tls {
            Some((cert, key)) => {
                let keycert = Keycert::new()
                    .cert_from_path(cert)
                    .map_err(Error::TlsConfig)?
                    .key_from_path(key)
                    .map_err(Error::TlsConfig)?;
                Some(keycert.build_acceptor().map_err(Error::TlsConfig)?)
            }
            None => None,
        };

        let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
        let url = format!(
            "{scheme}://{}:{port}{}",
            url_host(&self.config.host),
            self.endpoint
        );

        Ok(BoundServer {
            server: self,
            listener,
            tls_acceptor,
            url,
        })
    }
}

/// A [`FormServer`] whose socket is bound and whose URL is known.
pub struct BoundServer {
    server: FormServer,
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    url: String,
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("server", &self.server)
            .field("url", &self.url)
            .field("tls", &self.tls_acceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl BoundServer {
    /// The canonical URL of the served form.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serve until exactly one valid submission arrives or the deadline
    /// fires, then shut down and report what happened.
    ///
    /// The URL is printed to stderr, and the browser — when requested —
    /// is launched strictly after the socket was bound, so it can never
    /// race the listener.
    pub async fn serve(self, launch_browser: Option<&BrowserLaunch>) -> ServeOutcome {
        let Self {
            server,
            listener,
            tls_acceptor,
            url,
        } = self;
        let FormServer {
            config,
            csrf_token,
            endpoint,
            upload_dir,
            html,
        } = server;

        eprintln!("\nOpen this URL in your browser:\n  {url}\n");
        if let Some(launch) = launch_browser {
            let executable = match launch {
                BrowserLaunch::Default => None,
                BrowserLaunch::Executable(path) => Some(path.as_path()),
            };
            browser::launch(&url, executable);
        }

        let outcome = Arc::new(OutcomeCell::default());
        let shutdown = CancellationToken::new();
        let deadline = {
            let outcome = Arc::clone(&outcome);
            let shutdown = shutdown.clone();
            Deadline::spawn(config.timeout, config.reset_timeout_on_error, move || {
                if outcome.fill(ServeOutcome::TimedOut) {
                    tracing::info!("deadline expired; shutting down");
                }
                shutdown.cancel();
            })
        };

        let ctx = Arc::new(HandlerContext {
            html,
            csrf_token,
            endpoint,
            max_file_size: config.max_file_size,
            max_total_size: config.max_total_size,
            upload_dir,
            outcome: Arc::clone(&outcome),
            shutdown: shutdown.clone(),
            deadline: deadline.clone(),
        });

        let mut accept_task = tokio::spawn(accept_loop(
            listener,
            tls_acceptor,
            ctx,
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        deadline.cancel();
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, &mut accept_task)
            .await
            .is_err()
        {
            // Aborting drops the listener and with it the socket.
            accept_task.abort();
        }

        match outcome.take() {
            Some(result) => result,
            None => ServeOutcome::TimedOut,
        }
    }
}

/// IPv6 literal hosts must be bracketed inside a URL.
fn url_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_owned()
    }
}

/// Accept connections until the shutdown token cancels. Owns the
/// listener: when this returns, the socket closes, which is what finally
/// unblocks browsers holding idle keep-alive connections.
async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: Arc<HandlerContext>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()) => accepted,
        };
        match accepted {
            // Periodic wakeup; loop around and re-check the token.
            Err(_) => {}
            Ok(Ok((stream, remote_addr))) => {
                tracing::debug!(%remote_addr, "accepted connection");
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                match tls_acceptor.clone() {
                    Some(acceptor) => {
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(stream) => drive(stream, ctx, shutdown).await,
                                Err(err) => {
                                    tracing::warn!(%err, %remote_addr, "tls handshake failed");
                                }
                            }
                        });
                    }
                    None => {
                        tokio::spawn(drive(stream, ctx, shutdown));
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Run one HTTP/1.1 connection. On shutdown the connection finishes its
/// in-flight response and closes instead of idling on keep-alive.
async fn drive<IO>(io: IO, ctx: Arc<HandlerContext>, shutdown: CancellationToken)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { Ok::<_, Infallible>(handler::handle(ctx, req).await) }
    });
    let conn = http1::Builder::new().serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                tracing::debug!(%err, "connection closed with error");
            }
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.as_mut().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(url_host("127.0.0.1"), "127.0.0.1");
        assert_eq!(url_host("localhost"), "localhost");
        assert_eq!(url_host("::1"), "[::1]");
        assert_eq!(url_host("fe80::1"), "[fe80::1]");
    }

    #[test]
    fn outcome_cell_is_write_once() {
        let cell = OutcomeCell::default();
        assert!(cell.fill(ServeOutcome::TimedOut));
        assert!(!cell.fill(ServeOutcome::Submitted(SubmittedForm::default())));
        assert!(matches!(cell.take(), Some(ServeOutcome::TimedOut)));
        assert!(cell.take().is_none());
    }

    #[test]
    fn run_config_defaults() {
        let config = RunConfig::new("127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(config.reset_timeout_on_error);
        assert!(config.tls.is_none());
        assert!(config.max_file_size.is_none());
        assert!(config.max_total_size.is_none());
    }

    #[tokio::test]
    async fn server_mints_tokens_and_upload_dir() {
        let server = FormServer::new(RunConfig::new("127.0.0.1")).expect("server");
        assert_eq!(server.csrf_token().len(), 32);
        assert!(server.endpoint().starts_with("/readform_"));
        assert!(server.upload_dir().exists());
        let name = server
            .upload_dir()
            .file_name()
            .and_then(|n| n.to_str())
            .expect("dir name");
        assert!(name.starts_with("readwebform_"));
        std::fs::remove_dir_all(server.upload_dir()).ok();
    }

    #[tokio::test]
    async fn binding_an_occupied_port_fails() {
        let first = FormServer::new(RunConfig::new("127.0.0.1"))
            .expect("server")
            .bind()
            .await
            .expect("bind");
        let port: u16 = first
            .url()
            .split(':')
            .nth(2)
            .and_then(|rest| rest.split('/').next())
            .and_then(|p| p.parse().ok())
            .expect("port from url");

        let second = FormServer::new(RunConfig::new("127.0.0.1").port(port))
            .expect("server")
            .bind()
            .await;
        assert!(matches!(second, Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn tls_config_failure_reports_and_releases_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").expect("write cert");
        std::fs::write(&key, "not a key").expect("write key");

        let config = RunConfig::new("127.0.0.1").tls_paths(&cert, &key);
        let err = FormServer::new(config)
            .expect("server")
            .bind()
            .await
            .expect_err("tls must fail");
        assert!(matches!(err, Error::TlsConfig(_)));
    }
}
