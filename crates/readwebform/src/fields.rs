//! Declarative form generation from `--field` specifications.
//!
//! A specification reads `name:type[:label][:options]`, for example
//! `email:email:Work+email:required,placeholder=you%40example.com`.
//! Labels and option values are plus/percent-decoded; options are
//! comma-separated `key=value` pairs or bare flags such as `required`.

use percent_encoding::percent_decode_str;

use crate::html::{escape_attr, escape_html};

/// Supported field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldType {
    Text,
    Email,
    Password,
    Number,
    Date,
    Url,
    Textarea,
    Select,
    Checkbox,
    File,
}

impl FieldType {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "text" => Self::Text,
            "email" => Self::Email,
            "password" => Self::Password,
            "number" => Self::Number,
            "date" => Self::Date,
            "url" => Self::Url,
            "textarea" => Self::Textarea,
            "select" => Self::Select,
            "checkbox" => Self::Checkbox,
            "file" => Self::File,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Password => "password",
            Self::Number => "number",
            Self::Date => "date",
            Self::Url => "url",
            Self::Textarea => "textarea",
            Self::Select => "select",
            Self::Checkbox => "checkbox",
            Self::File => "file",
        }
    }
}

/// One parsed `--field` specification.
#[derive(Debug)]
pub(crate) struct FieldSpec {
    pub(crate) name: String,
    pub(crate) field_type: FieldType,
    pub(crate) label: String,
    options: Vec<(String, String)>,
}

impl FieldSpec {
    /// Parse `name:type[:label][:options]`.
    pub(crate) fn parse(spec: &str) -> Result<Self, String> {
        let mut parts = spec.splitn(4, ':');
        let name = parts.next().unwrap_or_default().trim();
        let Some(type_text) = parts.next().map(str::trim) else {
            return Err(format!(
                "Invalid field spec: {spec} (expected name:type[:label][:options])"
            ));
        };
        let field_type = FieldType::parse(type_text).ok_or_else(|| {
            format!(
                "Invalid field type: {type_text} (must be one of text, email, password, \
                 number, date, url, textarea, select, checkbox, file)"
            )
        })?;
        let label = parts
            .next()
            .map(unquote_plus)
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| name.to_owned());
        let options = parts.next().map(parse_options).unwrap_or_default();
        Ok(Self {
            name: name.to_owned(),
            field_type,
            label,
            options,
        })
    }

    fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn has_flag(&self, key: &str) -> bool {
        self.option(key).is_some()
    }
}

fn parse_options(text: &str) -> Vec<(String, String)> {
    let mut options = Vec::new();
    for option in text.split(',') {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        match option.split_once('=') {
            Some((key, value)) => {
                options.push((key.trim().to_owned(), unquote_plus(value.trim())));
            }
            None => options.push((option.to_owned(), "true".to_owned())),
        }
    }
    options
}

fn unquote_plus(text: &str) -> String {
    percent_decode_str(&text.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Generate the `<form>` element for a list of field specifications.
pub(crate) fn generate_form_html(
    fields: &[FieldSpec],
    add_submit_button: bool,
    add_cancel_button: bool,
    cancel_label: &str,
) -> String {
    let has_file_field = fields.iter().any(|f| f.field_type == FieldType::File);
    let enctype = if has_file_field {
        " enctype=\"multipart/form-data\""
    } else {
        ""
    };

    let mut parts = vec![format!("<form method=\"POST\"{enctype}>")];
    for field in fields {
        parts.push(generate_field_html(field));
    }
    if add_submit_button {
        parts.push("    <button type=\"submit\">Submit</button>".to_owned());
    }
    if add_cancel_button {
        parts.push(format!(
            "    <button type=\"submit\" name=\"_cancel\" value=\"1\" class=\"cancel\" \
             formnovalidate>{}</button>",
            escape_html(cancel_label)
        ));
    }
    parts.push("</form>".to_owned());
    parts.join("\n")
}

fn generate_field_html(field: &FieldSpec) -> String {
    let label = format!(
        "    <label for=\"{}\">{}</label>",
        escape_attr(&field.name),
        escape_html(&field.label)
    );
    match field.field_type {
        FieldType::Textarea => format!("{label}\n{}", generate_textarea(field)),
        FieldType::Select => format!("{label}\n{}", generate_select(field)),
        FieldType::Checkbox => generate_checkbox(field),
        _ => format!("{label}\n{}", generate_input(field)),
    }
}

fn generate_input(field: &FieldSpec) -> String {
    let mut attrs: Vec<(&str, Option<&str>)> = vec![
        ("type", Some(field.field_type.as_str())),
        ("name", Some(&field.name)),
        ("id", Some(&field.name)),
    ];
    for key in ["placeholder", "min", "max", "step", "accept", "pattern"] {
        if let Some(value) = field.option(key) {
            attrs.push((key, Some(value)));
        }
    }
    if field.has_flag("required") {
        attrs.push(("required", None));
    }
    if field.has_flag("multiple") && field.field_type == FieldType::File {
        attrs.push(("multiple", None));
    }
    format!("    {}", build_tag("input", &attrs))
}

fn generate_textarea(field: &FieldSpec) -> String {
    let mut attrs: Vec<(&str, Option<&str>)> =
        vec![("name", Some(&field.name)), ("id", Some(&field.name))];
    for key in ["rows", "cols", "placeholder"] {
        if let Some(value) = field.option(key) {
            attrs.push((key, Some(value)));
        }
    }
    if field.has_flag("required") {
        attrs.push(("required", None));
    }
    format!("    {}</textarea>", build_tag("textarea", &attrs))
}

fn generate_select(field: &FieldSpec) -> String {
    let mut attrs: Vec<(&str, Option<&str>)> =
        vec![("name", Some(&field.name)), ("id", Some(&field.name))];
    if field.has_flag("required") {
        attrs.push(("required", None));
    }
    if field.has_flag("multiple") {
        attrs.push(("multiple", None));
    }

    let mut out = format!("    {}\n", build_tag("select", &attrs));
    if let Some(options) = field.option("options") {
        for option in options.split('|') {
            let option = option.trim();
            out.push_str(&format!(
                "        <option value=\"{}\">{}</option>\n",
                escape_attr(option),
                escape_html(option)
            ));
        }
    }
    out.push_str("    </select>");
    out
}

fn generate_checkbox(field: &FieldSpec) -> String {
    let value = field.option("value").unwrap_or("on");
    let mut attrs: Vec<(&str, Option<&str>)> = vec![
        ("type", Some("checkbox")),
        ("name", Some(&field.name)),
        ("id", Some(&field.name)),
        ("value", Some(value)),
    ];
    if field.has_flag("required") {
        attrs.push(("required", None));
    }
    format!(
        "    {} <label for=\"{}\">{}</label>",
        build_tag("input", &attrs),
        escape_attr(&field.name),
        escape_html(&field.label)
    )
}

fn build_tag(tag: &str, attrs: &[(&str, Option<&str>)]) -> String {
    let mut parts = Vec::with_capacity(attrs.len());
    for (key, value) in attrs {
        match value {
            Some(value) => parts.push(format!("{key}=\"{}\"", escape_attr(value))),
            // Boolean attribute.
            None => parts.push((*key).to_owned()),
        }
    }
    if parts.is_empty() {
        format!("<{tag}>")
    } else {
        format!("<{tag} {}>", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_spec() {
        let field = FieldSpec::parse("name:text").expect("parse");
        assert_eq!(field.name, "name");
        assert_eq!(field.field_type, FieldType::Text);
        assert_eq!(field.label, "name");
    }

    #[test]
    fn parses_label_and_options() {
        let field = FieldSpec::parse("email:email:Work+email:required,placeholder=you%40example.com")
            .expect("parse");
        assert_eq!(field.label, "Work email");
        assert!(field.has_flag("required"));
        assert_eq!(field.option("placeholder"), Some("you@example.com"));
    }

    #[test]
    fn rejects_bad_specs() {
        assert!(FieldSpec::parse("lonely").is_err());
        assert!(FieldSpec::parse("x:spinner").is_err());
    }

    #[test]
    fn generates_labelled_input() {
        let field = FieldSpec::parse("age:number:Your+age:min=0,max=120").expect("parse");
        let html = generate_field_html(&field);
        assert!(html.contains("<label for=\"age\">Your age</label>"));
        assert!(html.contains("type=\"number\""));
        assert!(html.contains("min=\"0\""));
        assert!(html.contains("max=\"120\""));
    }

    #[test]
    fn file_fields_switch_form_to_multipart() {
        let fields = vec![
            FieldSpec::parse("doc:file").expect("parse"),
            FieldSpec::parse("note:text").expect("parse"),
        ];
        let html = generate_form_html(&fields, true, false, "Cancel");
        assert!(html.starts_with("<form method=\"POST\" enctype=\"multipart/form-data\">"));
        assert!(html.contains("<button type=\"submit\">Submit</button>"));
        assert!(!html.contains("_cancel"));
    }

    #[test]
    fn select_renders_piped_options() {
        let field = FieldSpec::parse("color:select::options=red|green|blue").expect("parse");
        let html = generate_field_html(&field);
        assert!(html.contains("<option value=\"red\">red</option>"));
        assert!(html.contains("<option value=\"blue\">blue</option>"));
    }

    #[test]
    fn checkbox_places_label_after_input() {
        let field = FieldSpec::parse("agree:checkbox:I+agree").expect("parse");
        let html = generate_field_html(&field);
        let input_pos = html.find("<input").expect("input");
        let label_pos = html.find("<label").expect("label");
        assert!(input_pos < label_pos);
        assert!(html.contains("value=\"on\""));
    }

    #[test]
    fn cancel_button_is_escaped_and_non_validating() {
        let html = generate_form_html(
            &[FieldSpec::parse("x:text").expect("parse")],
            true,
            true,
            "Never <mind>",
        );
        assert!(html.contains("formnovalidate"));
        assert!(html.contains("Never &lt;mind&gt;"));
        assert!(html.contains("name=\"_cancel\""));
    }

    #[test]
    fn labels_are_html_escaped() {
        let field = FieldSpec::parse("x:text:<b>bold</b>").expect("parse");
        let html = generate_field_html(&field);
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;b&gt;"));
    }
}
