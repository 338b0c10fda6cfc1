//! readwebform: collect structured input from a human through a
//! single-use, ephemeral web form.
//!
//! The binary wires the argument surface, HTML preparation and output
//! envelopes around [`readwebform_core`], which owns the server and its
//! lifecycle. Stdout carries only the result envelope; everything meant
//! for the operator (the URL, warnings, errors) goes to stderr.

mod cli;
mod fields;
mod html;
mod output;

use std::io::{IsTerminal, Read};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indexmap::IndexMap;
use readwebform_core::{BrowserLaunch, FormServer, RunConfig, ServeOutcome, parse_size_limit};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Exit codes shared with the tool's documented interface.
mod exit_code {
    pub(crate) const SUCCESS: u8 = 0;
    pub(crate) const INTERNAL_ERROR: u8 = 1;
    pub(crate) const INVALID_HTML: u8 = 2;
    pub(crate) const READ_ERROR: u8 = 3;
    /// Reserved. Browser launch failures are logged and non-fatal, so this
    /// code is documented but never produced.
    #[allow(dead_code)]
    pub(crate) const BROWSER_LAUNCH_ERROR: u8 = 4;
    pub(crate) const TIMEOUT: u8 = 5;
    /// Reserved for size violations surfaced outside a run; in-run size
    /// violations are answered with HTTP 413 and do not end the process.
    #[allow(dead_code)]
    pub(crate) const UPLOAD_SIZE_EXCEEDED: u8 = 6;
    pub(crate) const INVALID_ARGUMENT: u8 = 7;
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // --help and --version land here too; only real argument
            // errors use the invalid-argument code.
            let failed = err.use_stderr();
            let _ = err.print();
            return if failed {
                ExitCode::from(exit_code::INVALID_ARGUMENT)
            } else {
                ExitCode::from(exit_code::SUCCESS)
            };
        }
    };

    ExitCode::from(run(args).await)
}

async fn run(args: Cli) -> u8 {
    tracing::debug!(
        json = args.json,
        print_env = args.print_env,
        envfile = ?args.envfile,
        "output mode"
    );

    let html = match load_html(&args) {
        Ok(html) => html,
        Err(code) => return code,
    };
    let html = html::wrap_html_fragment(&html, args.title.as_deref(), args.text.as_deref());

    // Declarative mode adds its own submit button, so the warning would
    // only be noise there.
    let warn_no_submit = args.field.is_empty() || args.no_submit_button;
    if let Err(err) = html::validate_html(&html, warn_no_submit) {
        eprintln!("Error: {err}");
        return exit_code::INVALID_HTML;
    }

    let max_file_size = match parse_limit_arg(args.max_file_size.as_deref(), "--max-file-size") {
        Ok(limit) => limit,
        Err(code) => return code,
    };
    let max_total_size = match parse_limit_arg(args.max_total_size.as_deref(), "--max-total-size") {
        Ok(limit) => limit,
        Err(code) => return code,
    };

    let mut config = RunConfig::new(args.host.clone())
        .timeout(Duration::from_secs(args.timeout))
        .reset_timeout_on_error(args.reset_timeout_on_error)
        .max_file_size(max_file_size)
        .max_total_size(max_total_size);
    if let Some(port) = args.port {
        config = config.port(port);
    }
    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        config = config.tls_paths(cert, key);
    }

    let mut server = match FormServer::new(config) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Error: {err}");
            return exit_code::INTERNAL_ERROR;
        }
    };
    let injected = html::inject_csrf_token(&html, server.csrf_token(), server.endpoint());
    server.set_html(injected);

    if matches!(args.host.as_str(), "0.0.0.0" | "::") {
        eprintln!("Warning: Binding to all interfaces. Form will be accessible from other machines.");
        eprintln!("         Consider using --host 127.0.0.1 for local-only access.");
    }

    let browser = args.launch_browser.as_deref().map(|path| {
        if path.is_empty() {
            BrowserLaunch::Default
        } else {
            BrowserLaunch::Executable(path.into())
        }
    });

    let bound = match server.bind().await {
        Ok(bound) => bound,
        Err(err) => {
            eprintln!("Error: {err}");
            return exit_code::INTERNAL_ERROR;
        }
    };

    let outcome = tokio::select! {
        outcome = bound.serve(browser.as_ref()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n\nInterrupted by user");
            return exit_code::INTERNAL_ERROR;
        }
    };

    match outcome {
        ServeOutcome::TimedOut => {
            if !args.print_env {
                let empty = IndexMap::new();
                let no_files = IndexMap::new();
                println!(
                    "{}",
                    output::format_json_output(&empty, &no_files, false, Some("timeout"))
                );
            }
            eprintln!("Error: Timeout waiting for submission");
            exit_code::TIMEOUT
        }
        ServeOutcome::Submitted(form) => {
            if args.print_env {
                println!(
                    "{}",
                    output::format_env_output(&form.fields, output::ENV_PREFIX)
                );
            } else if let Some(path) = &args.envfile {
                if let Err(err) = output::write_env_file(path, &form.fields, output::ENV_PREFIX) {
                    eprintln!("Error: failed to write {}: {err}", path.display());
                    return exit_code::INTERNAL_ERROR;
                }
                println!(
                    "{}",
                    output::format_json_output(&form.fields, &form.files, true, None)
                );
            } else {
                println!(
                    "{}",
                    output::format_json_output(&form.fields, &form.files, true, None)
                );
            }
            exit_code::SUCCESS
        }
    }
}

/// Resolve the HTML source: inline string, file, declarative fields, or
/// standard input, in that priority order.
fn load_html(args: &Cli) -> Result<String, u8> {
    if let Some(html) = &args.html {
        return Ok(html.clone());
    }

    if let Some(path) = &args.htmlfile {
        return std::fs::read_to_string(path).map_err(|err| {
            eprintln!("Error: failed to read {}: {err}", path.display());
            exit_code::READ_ERROR
        });
    }

    if !args.field.is_empty() {
        let mut specs = Vec::with_capacity(args.field.len());
        for raw in &args.field {
            match fields::FieldSpec::parse(raw) {
                Ok(spec) => specs.push(spec),
                Err(err) => {
                    eprintln!("Error: {err}");
                    return Err(exit_code::INVALID_HTML);
                }
            }
        }
        return Ok(fields::generate_form_html(
            &specs,
            !args.no_submit_button,
            !args.no_cancel_button,
            &args.cancel_label,
        ));
    }

    if std::io::stdin().is_terminal() {
        eprintln!("Reading HTML from stdin (press Ctrl-D when done)...");
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|err| {
            eprintln!("Error: failed to read stdin: {err}");
            exit_code::READ_ERROR
        })?;
    Ok(buffer)
}

fn parse_limit_arg(value: Option<&str>, flag: &str) -> Result<Option<u64>, u8> {
    let Some(value) = value else {
        return Ok(None);
    };
    parse_size_limit(value).map_err(|err| {
        eprintln!("Error: Invalid {flag}: {err}");
        eprintln!("       Use a format like 5M, 200K, 1G, or plain bytes");
        exit_code::INVALID_ARGUMENT
    })
}
