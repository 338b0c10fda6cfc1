//! Per-request logic for the form endpoint.
//!
//! Every connection shares one immutable [`HandlerContext`]; handlers
//! answer over HTTP and never surface errors to the waiting caller. A
//! recoverable client mistake (bad body, size cap, CSRF mismatch) re-arms
//! the deadline so the user can correct and resubmit.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::deadline::Deadline;
use crate::form::{self, FormData};
use crate::server::{OutcomeCell, ServeOutcome, SubmittedForm};
use crate::storage::{self, StoredFile};

/// Request body cap applied when no total limit is configured, so an
/// unconfigured run cannot be fed an arbitrarily large body.
pub(crate) const DEFAULT_MAX_BODY_SIZE: u64 = 20 * 1024 * 1024;

/// How long a successful handler waits before signalling shutdown, so the
/// acknowledgement page flushes before the listener closes.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Immutable per-run state shared by every connection.
#[derive(Debug)]
pub(crate) struct HandlerContext {
    pub(crate) html: String,
    pub(crate) csrf_token: String,
    pub(crate) endpoint: String,
    pub(crate) max_file_size: Option<u64>,
    pub(crate) max_total_size: Option<u64>,
    pub(crate) upload_dir: PathBuf,
    pub(crate) outcome: Arc<OutcomeCell>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) deadline: Deadline,
}

/// Dispatch one request. Only the minted endpoint exists; everything else
/// is 404.
pub(crate) async fn handle<B>(ctx: Arc<HandlerContext>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    if req.method() == Method::GET {
        handle_get(&ctx, &req)
    } else if req.method() == Method::POST {
        handle_post(&ctx, req).await
    } else {
        not_found()
    }
}

/// GET serves the stored document. Never consumes the deadline, never
/// triggers shutdown.
fn handle_get<B>(ctx: &HandlerContext, req: &Request<B>) -> Response<Full<Bytes>> {
    if req.uri().path() != ctx.endpoint {
        return not_found();
    }
    let mut res = html_response(StatusCode::OK, ctx.html.clone());
    res.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    res
}

async fn handle_post<B>(ctx: &Arc<HandlerContext>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    if req.uri().path() != ctx.endpoint {
        return not_found();
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let Some(content_length) = content_length else {
        ctx.deadline.reset();
        return error_page(
            StatusCode::BAD_REQUEST,
            "Bad Request",
            "Invalid Content-Length header",
            &ctx.endpoint,
        );
    };

    let effective_max = ctx.max_total_size.unwrap_or(DEFAULT_MAX_BODY_SIZE);
    if content_length > effective_max {
        ctx.deadline.reset();
        tracing::warn!(content_length, limit = effective_max, "upload limit exceeded");
        return error_page(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Payload Too Large",
            &format!(
                "Total upload size ({content_length} bytes) exceeds limit ({effective_max} bytes)"
            ),
            &ctx.endpoint,
        );
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::error!(%err, "failed to read request body");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                &format!("Failed to read request: {err}"),
                &ctx.endpoint,
            );
        }
    };

    let mut form = match form::decode(&body, &content_type, ctx.max_file_size, ctx.max_total_size)
    {
        Ok(form) => form,
        Err(err) if err.is_size_limit() => {
            ctx.deadline.reset();
            tracing::warn!(%err, "upload limit exceeded");
            return error_page(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large",
                &err.to_string(),
                &ctx.endpoint,
            );
        }
        Err(err) => {
            ctx.deadline.reset();
            return error_page(
                StatusCode::BAD_REQUEST,
                "Bad Request",
                &format!("Failed to parse form data: {err}"),
                &ctx.endpoint,
            );
        }
    };

    let token_matches = matches!(
        form.fields.get("_csrf_token").map(Vec::as_slice),
        Some([token]) if *token == ctx.csrf_token
    );
    if !token_matches {
        ctx.deadline.reset();
        tracing::warn!("csrf token mismatch");
        return error_page(
            StatusCode::FORBIDDEN,
            "Forbidden",
            "Invalid CSRF token",
            &ctx.endpoint,
        );
    }
    form.fields.shift_remove("_csrf_token");

    let mut stored: IndexMap<String, Vec<StoredFile>> = IndexMap::new();
    for (name, uploads) in &form.files {
        for upload in uploads {
            match storage::store_file(upload, &ctx.upload_dir).await {
                Ok(file) => stored.entry(name.clone()).or_default().push(file),
                Err(err) => {
                    // Server-side condition: answer 500 but leave the
                    // deadline alone and keep the run alive.
                    tracing::error!(%err, filename = %upload.filename, "failed to store uploaded file");
                    return error_page(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error",
                        &format!("Failed to save file: {err}"),
                        &ctx.endpoint,
                    );
                }
            }
        }
    }

    ctx.deadline.cancel();
    publish_after_settle(ctx, form, stored);
    success_page()
}

/// Record the submission and signal shutdown once the response has had
/// time to flush. A deadline that beats the settle delay wins the outcome
/// cell and the submission is discarded.
fn publish_after_settle(
    ctx: &Arc<HandlerContext>,
    form: FormData,
    files: IndexMap<String, Vec<StoredFile>>,
) {
    let submission = SubmittedForm {
        fields: form.fields,
        files,
    };
    let outcome = Arc::clone(&ctx.outcome);
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SETTLE_DELAY).await;
        if !outcome.fill(ServeOutcome::Submitted(submission)) {
            tracing::debug!("submission arrived after shutdown; discarded");
        }
        shutdown.cancel();
    });
}

fn html_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(body.into()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    res
}

fn not_found() -> Response<Full<Bytes>> {
    html_response(
        StatusCode::NOT_FOUND,
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>Not Found</title></head>\n\
         <body><h1>404 Not Found</h1></body>\n</html>",
    )
}

fn success_page() -> Response<Full<Bytes>> {
    let body = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Success</title>
    <style>
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 600px;
            margin: 100px auto;
            padding: 20px;
            text-align: center;
        }
        .success {
            color: #28a745;
            font-size: 24px;
            font-weight: 500;
        }
    </style>
</head>
<body>
    <div class="success">&#9989; Form submitted successfully</div>
    <p>You may now close this window.</p>
</body>
</html>"#;
    html_response(StatusCode::OK, body)
}

/// Render an error page. User-supplied fragments (filenames, decoder
/// messages) are escaped before they reach the document.
fn error_page(
    status: StatusCode,
    title: &str,
    message: &str,
    endpoint: &str,
) -> Response<Full<Bytes>> {
    let safe_title = escape_html(title);
    let safe_message = escape_html(message);
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{safe_title}</title>
    <style>
        body {{
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 600px;
            margin: 100px auto;
            padding: 20px;
            text-align: center;
        }}
        .error {{
            color: #dc3545;
            font-size: 24px;
            font-weight: 500;
        }}
        .back {{
            margin-top: 20px;
        }}
        a {{
            color: #007bff;
            text-decoration: none;
        }}
    </style>
</head>
<body>
    <div class="error">&#10060; {safe_title}</div>
    <p>{safe_message}</p>
    <div class="back"><a href="{endpoint}">&larr; Go back</a></div>
</body>
</html>"#
    );
    html_response(status, body)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
