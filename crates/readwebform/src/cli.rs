//! Command-line argument surface.

use std::path::PathBuf;

use clap::Parser;

/// Gather structured user input through a temporary web form.
///
/// The HTML source comes from exactly one of `--html`, `--htmlfile` or
/// `--field` (repeatable); with none of them the document is read from
/// standard input.
#[derive(Parser, Debug)]
#[command(
    name = "readwebform",
    version,
    about = "Gather structured user input through a temporary web form",
    after_help = "Reads HTML from standard input when no input source is given."
)]
pub(crate) struct Cli {
    /// Inline HTML fragment or document containing one <form> element.
    #[arg(long, value_name = "string", group = "input")]
    pub(crate) html: Option<String>,

    /// Path to an HTML file containing a form.
    #[arg(long, value_name = "path", group = "input")]
    pub(crate) htmlfile: Option<PathBuf>,

    /// Declaratively define a form field (name:type[:label][:options]).
    /// May be given multiple times.
    #[arg(long = "field", value_name = "spec", group = "input")]
    pub(crate) field: Vec<String>,

    /// Page title shown above the form.
    #[arg(long, value_name = "string")]
    pub(crate) title: Option<String>,

    /// Instructional text shown above the form.
    #[arg(long, value_name = "string")]
    pub(crate) text: Option<String>,

    /// Host/IP to bind to.
    #[arg(long, value_name = "ip", default_value = "127.0.0.1")]
    pub(crate) host: String,

    /// TCP port (default: auto-select a free port).
    #[arg(long, value_name = "int", value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) port: Option<u16>,

    /// Path to the TLS certificate file (PEM format) for HTTPS.
    #[arg(long, value_name = "path", requires = "key")]
    pub(crate) cert: Option<PathBuf>,

    /// Path to the TLS private key file (PEM format) for HTTPS.
    #[arg(long, value_name = "path", requires = "cert")]
    pub(crate) key: Option<PathBuf>,

    /// Maximum individual upload size (e.g. 5M, 200K).
    #[arg(long, value_name = "limit")]
    pub(crate) max_file_size: Option<String>,

    /// Maximum total upload size (e.g. 20M, 1G).
    #[arg(long, value_name = "limit")]
    pub(crate) max_total_size: Option<String>,

    /// Max time to wait for a submission, in seconds.
    #[arg(long, value_name = "seconds", default_value_t = 300,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) timeout: u64,

    /// Reset the timeout on recoverable errors.
    #[arg(long, value_name = "bool", default_value = "true", value_parser = parse_bool, action = clap::ArgAction::Set)]
    pub(crate) reset_timeout_on_error: bool,

    /// Output the result as JSON to stdout (the default).
    #[arg(long)]
    pub(crate) json: bool,

    /// Write sanitised export statements to a file.
    #[arg(long, value_name = "path")]
    pub(crate) envfile: Option<PathBuf>,

    /// Print sanitised environment variable exports to stdout.
    #[arg(long)]
    pub(crate) print_env: bool,

    /// Launch a web browser (system default when no path is given).
    #[arg(long, value_name = "path", num_args = 0..=1, default_missing_value = "")]
    pub(crate) launch_browser: Option<String>,

    /// Disable the automatic submit button in declarative mode.
    #[arg(long)]
    pub(crate) no_submit_button: bool,

    /// Disable the cancel button in declarative mode.
    #[arg(long)]
    pub(crate) no_cancel_button: bool,

    /// Label for the cancel button.
    #[arg(long, value_name = "text", default_value = "Cancel")]
    pub(crate) cancel_label: String,
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        _ => Err(format!("boolean value expected, got: {value}")),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["readwebform"]).expect("parse");
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.timeout, 300);
        assert!(cli.reset_timeout_on_error);
        assert!(cli.port.is_none());
        assert!(cli.launch_browser.is_none());
        assert_eq!(cli.cancel_label, "Cancel");
    }

    #[test]
    fn input_sources_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["readwebform", "--html", "<form></form>", "--htmlfile", "f.html"]).is_err());
        assert!(Cli::try_parse_from(["readwebform", "--html", "<form></form>", "--field", "x:text"]).is_err());
    }

    #[test]
    fn field_is_repeatable() {
        let cli = Cli::try_parse_from(["readwebform", "--field", "a:text", "--field", "b:email"])
            .expect("parse");
        assert_eq!(cli.field, vec!["a:text", "b:email"]);
    }

    #[test]
    fn cert_and_key_require_each_other() {
        assert!(Cli::try_parse_from(["readwebform", "--cert", "c.pem"]).is_err());
        assert!(Cli::try_parse_from(["readwebform", "--key", "k.pem"]).is_err());
        assert!(Cli::try_parse_from(["readwebform", "--cert", "c.pem", "--key", "k.pem"]).is_ok());
    }

    #[test]
    fn timeout_must_be_positive() {
        assert!(Cli::try_parse_from(["readwebform", "--timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["readwebform", "--timeout", "2"]).is_ok());
    }

    #[test]
    fn port_range_is_enforced() {
        assert!(Cli::try_parse_from(["readwebform", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["readwebform", "--port", "65536"]).is_err());
        let cli = Cli::try_parse_from(["readwebform", "--port", "8080"]).expect("parse");
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn launch_browser_accepts_bare_flag_and_path() {
        let cli = Cli::try_parse_from(["readwebform", "--launch-browser"]).expect("parse");
        assert_eq!(cli.launch_browser.as_deref(), Some(""));
        let cli = Cli::try_parse_from(["readwebform", "--launch-browser", "/usr/bin/firefox"])
            .expect("parse");
        assert_eq!(cli.launch_browser.as_deref(), Some("/usr/bin/firefox"));
    }

    #[test]
    fn reset_timeout_accepts_friendly_booleans() {
        for (text, expected) in [("yes", true), ("TRUE", true), ("1", true), ("no", false), ("f", false), ("0", false)] {
            let cli = Cli::try_parse_from(["readwebform", "--reset-timeout-on-error", text])
                .expect("parse");
            assert_eq!(cli.reset_timeout_on_error, expected, "{text}");
        }
        assert!(Cli::try_parse_from(["readwebform", "--reset-timeout-on-error", "maybe"]).is_err());
    }
}
