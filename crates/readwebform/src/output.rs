//! Output envelopes: the JSON document on stdout and shell environment
//! exports.

use std::io::Result as IoResult;
use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use readwebform_core::StoredFile;
use regex::Regex;
use serde_json::{Map, Value, json};

/// Prefix for exported environment variable names.
pub(crate) const ENV_PREFIX: &str = "WEBFORM_";

static VAR_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("invalid var name regex"));
static SHELL_SAFE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_@%+=:,./-]+$").expect("invalid shell safe regex"));

const ENV_DISCLAIMER: &str = "# WARNING: Environment files are for trusted local use only.\n\
                              # Do not source envfiles generated from untrusted form data.\n";

/// Render the result envelope. The shape is always
/// `{"success": bool, "fields": object, "files": object, "error": string|null}`,
/// pretty-printed with two-space indentation and no ASCII escaping.
/// Single values appear as strings, repeated values as arrays.
pub(crate) fn format_json_output(
    fields: &IndexMap<String, Vec<String>>,
    files: &IndexMap<String, Vec<StoredFile>>,
    success: bool,
    error: Option<&str>,
) -> String {
    let mut field_map = Map::new();
    for (name, values) in fields {
        field_map.insert(
            name.clone(),
            one_or_many(values.iter().map(|v| Value::String(v.clone()))),
        );
    }
    let mut file_map = Map::new();
    for (name, stored) in files {
        file_map.insert(name.clone(), one_or_many(stored.iter().map(file_entry)));
    }
    let envelope = json!({
        "success": success,
        "fields": field_map,
        "files": file_map,
        "error": error,
    });
    serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| "{}".to_owned())
}

fn one_or_many(values: impl Iterator<Item = Value>) -> Value {
    let mut values: Vec<Value> = values.collect();
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

fn file_entry(file: &StoredFile) -> Value {
    json!({
        "filename": file.original_filename,
        "path": file.stored_path.to_string_lossy(),
        "size": file.size_bytes,
        "content_type": file.content_type,
    })
}

/// Render `export NAME=value` lines for every exportable field, preceded
/// by a disclaimer comment. Field names that cannot form a valid shell
/// identifier after prefixing are skipped with a warning; repeated values
/// are joined with `,`.
pub(crate) fn format_env_output(fields: &IndexMap<String, Vec<String>>, prefix: &str) -> String {
    let mut lines = Vec::new();
    let mut skipped = Vec::new();

    for (name, values) in fields {
        let var_name = format!("{prefix}{}", name.to_uppercase());
        if !is_valid_var_name(&var_name) {
            skipped.push(name.as_str());
            continue;
        }
        let sanitized = sanitize_env_value(&values.join(","));
        lines.push(format!("export {var_name}={}", shell_quote(&sanitized)));
    }

    if !skipped.is_empty() {
        tracing::warn!(
            names = %skipped.join(", "),
            "skipped invalid environment variable names"
        );
    }

    format!("{ENV_DISCLAIMER}{}", lines.join("\n"))
}

/// Write the env-export rendering to a file.
pub(crate) fn write_env_file(
    path: &Path,
    fields: &IndexMap<String, Vec<String>>,
    prefix: &str,
) -> IoResult<()> {
    std::fs::write(path, format_env_output(fields, prefix))
}

fn is_valid_var_name(name: &str) -> bool {
    VAR_NAME_RE.is_match(name)
}

/// Strip control characters (keeping tab), drop CR, and turn LF into the
/// literal two characters `\n`.
fn sanitize_env_value(value: &str) -> String {
    let value = value.replace('\n', "\\n").replace('\r', "");
    value
        .chars()
        .filter(|&c| c == '\t' || (c >= ' ' && c != '\u{7f}'))
        .collect()
}

/// POSIX single-quoting; strings made only of safe characters pass
/// through bare.
fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_owned();
    }
    if SHELL_SAFE_RE.is_match(value) {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
