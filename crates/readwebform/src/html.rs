//! HTML document preparation: fragment wrapping, validation and CSRF
//! injection.
//!
//! The checks here are tag-level scans, not a full HTML parse; they are
//! meant to catch the mistakes that would make the served form useless
//! (no form, several forms, a form posting to a foreign host) before a
//! server is ever bound.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static FORM_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<form[^>]*>").expect("invalid form tag regex"));
static COMPLETE_DOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<!DOCTYPE|<html").expect("invalid document regex"));
static HEAD_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head[^>]*>").expect("invalid head tag regex"));
static ACTION_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s+action\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("invalid action regex")
});
static EXTERNAL_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?:)?//").expect("invalid external url regex"));
static INPUT_SUBMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<input[^>]*type\s*=\s*["']?submit"#).expect("invalid submit input regex")
});
static BUTTON_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<button[^>]*>").expect("invalid button tag regex"));
static BUTTON_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)type\s*=\s*["']?([a-z]+)"#).expect("invalid button type regex")
});

/// Check that the document contains exactly one form that posts to this
/// process. Warns (but does not fail) when no submit control is found.
pub(crate) fn validate_html(html: &str, warn_no_submit: bool) -> Result<(), String> {
    let forms: Vec<_> = FORM_TAG_RE.find_iter(html).collect();
    if forms.is_empty() {
        return Err("No <form> element found in HTML".to_owned());
    }
    if forms.len() > 1 {
        return Err(format!(
            "Multiple <form> elements found ({}), exactly one required",
            forms.len()
        ));
    }

    if let Some(caps) = ACTION_ATTR_RE.captures(forms[0].as_str()) {
        let action = strip_quotes(caps[1].trim());
        if is_external_url(action) {
            return Err(format!("External form action URL rejected: {action}"));
        }
    }

    if warn_no_submit && !has_submit_control(html) {
        tracing::warn!("no submit button found in form");
    }
    Ok(())
}

fn is_external_url(url: &str) -> bool {
    EXTERNAL_URL_RE.is_match(url.trim())
}

fn has_submit_control(html: &str) -> bool {
    if INPUT_SUBMIT_RE.is_match(html) {
        return true;
    }
    for tag in BUTTON_TAG_RE.find_iter(html) {
        match BUTTON_TYPE_RE.captures(tag.as_str()) {
            Some(caps) => {
                if caps[1].eq_ignore_ascii_case("submit") {
                    return true;
                }
            }
            // A button without an explicit type submits.
            None => return true,
        }
    }
    false
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Rewrite the first form tag to post to `endpoint` and insert the hidden
/// CSRF field directly after it. Any pre-existing `action` attribute is
/// dropped.
pub(crate) fn inject_csrf_token(html: &str, csrf_token: &str, endpoint: &str) -> String {
    let Some(found) = FORM_TAG_RE.find(html) else {
        return html.to_owned();
    };
    let tag = found.as_str();
    let without_action = ACTION_ATTR_RE.replace_all(tag, "");
    let opening = without_action.trim_end().trim_end_matches('>').trim_end();
    let rewritten = format!(
        "{opening} action=\"{endpoint}\" method=\"POST\">\
         <input type=\"hidden\" name=\"_csrf_token\" value=\"{csrf_token}\">"
    );

    let mut out = String::with_capacity(html.len() + rewritten.len());
    out.push_str(&html[..found.start()]);
    out.push_str(&rewritten);
    out.push_str(&html[found.end()..]);
    out
}

/// Wrap a fragment into a complete styled document, or slot the title and
/// instructional text into a document that already is one.
pub(crate) fn wrap_html_fragment(html: &str, title: Option<&str>, text: Option<&str>) -> String {
    if COMPLETE_DOC_RE.is_match(html) {
        let mut out = html.to_owned();
        if let Some(title) = title {
            if !out.to_lowercase().contains("<title>") {
                out = HEAD_TAG_RE
                    .replace(&out, |caps: &Captures| {
                        format!("{}<title>{}</title>", &caps[0], escape_html(title))
                    })
                    .into_owned();
            }
        }
        if let Some(text) = text {
            out = FORM_TAG_RE
                .replace(&out, |caps: &Captures| {
                    format!("<p>{}</p>{}", escape_html(text), &caps[0])
                })
                .into_owned();
        }
        return out;
    }

    let title_tag = match title {
        Some(title) => format!("<title>{}</title>", escape_html(title)),
        None => "<title>Form</title>".to_owned(),
    };
    let text_block = match text {
        Some(text) => format!("<p>{}</p>", escape_html(text)),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    {title_tag}
    <style>
        body {{
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 600px;
            margin: 40px auto;
            padding: 20px;
            line-height: 1.6;
        }}
        form {{
            background: #f5f5f5;
            padding: 20px;
            border-radius: 8px;
        }}
        input, textarea, select {{
            width: 100%;
            padding: 8px;
            margin: 8px 0;
            border: 1px solid #ddd;
            border-radius: 4px;
            box-sizing: border-box;
        }}
        button, input[type="submit"] {{
            background: #007bff;
            color: white;
            padding: 10px 20px;
            border: none;
            border-radius: 4px;
            cursor: pointer;
            margin-top: 10px;
        }}
        button:hover, input[type="submit"]:hover {{
            background: #0056b3;
        }}
        label {{
            display: block;
            margin-top: 10px;
            font-weight: 500;
        }}
    </style>
</head>
<body>
    {text_block}
    {html}
</body>
</html>"#
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

pub(crate) fn escape_attr(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
