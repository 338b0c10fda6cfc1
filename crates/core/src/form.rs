//! Decoding of submitted request bodies.
//!
//! Supports `multipart/form-data` and `application/x-www-form-urlencoded`
//! bodies. Decoding operates on the complete body bytes (the handler reads
//! exactly `Content-Length` bytes first) and enforces the configured byte
//! caps before anything else, so a hostile body is rejected without being
//! parsed.

use std::sync::LazyLock;

use bytes::Bytes;
use indexmap::IndexMap;
use mime::Mime;
use regex::Regex;
use thiserror::Error;

static NAME_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*name\s*=\s*(?:"([^"]*)"|([^;\s]+))"#)
        .expect("invalid name param regex")
});
static FILENAME_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#)
        .expect("invalid filename param regex")
});

/// Errors produced while decoding a request body.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// The whole body is larger than the configured total cap. Raised
    /// before any parsing happens.
    #[error("total upload size {size} exceeds limit {limit}")]
    TotalSizeExceeded {
        /// Received body size in bytes.
        size: u64,
        /// The configured cap.
        limit: u64,
    },

    /// A single file part is larger than the configured per-file cap.
    #[error("file {filename} size {size} exceeds limit {limit}")]
    FileSizeExceeded {
        /// The filename claimed by the part.
        filename: String,
        /// Received part size in bytes.
        size: u64,
        /// The configured cap.
        limit: u64,
    },

    /// A multipart body whose `Content-Type` carries no usable boundary.
    #[error("no boundary found in Content-Type header")]
    MissingBoundary,
}

impl DecodeError {
    /// Whether this error is a byte-cap violation (answered with 413)
    /// rather than a malformed body (answered with 400).
    #[must_use]
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            Self::TotalSizeExceeded { .. } | Self::FileSizeExceeded { .. }
        )
    }
}

/// A file received as part of a `multipart/form-data` body, still held in
/// memory. Persist it with [`storage::store_file`](crate::storage::store_file).
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The filename exactly as the client sent it. May be empty.
    pub filename: String,
    /// The raw file bytes.
    pub content: Bytes,
    /// The part's `Content-Type`, defaulted to `application/octet-stream`
    /// when the part carried none.
    pub content_type: String,
}

impl UploadedFile {
    /// Size of the received content in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// The decoded text fields and uploaded files of one submission.
///
/// Both maps preserve insertion order, and repeated names accumulate their
/// values in submission order. A name present in a map always carries at
/// least one value.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct FormData {
    /// Name-value pairs for plain text fields: form data parts with no
    /// `filename` in their `Content-Disposition`, or urlencoded pairs.
    pub fields: IndexMap<String, Vec<String>>,
    /// Received files, keyed by field name.
    pub files: IndexMap<String, Vec<UploadedFile>>,
}

impl FormData {
    /// Create an empty `FormData`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field value, preserving earlier values for the same name.
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_default().push(value.into());
    }

    /// Append an uploaded file, preserving earlier files for the same name.
    pub fn push_file(&mut self, name: impl Into<String>, file: UploadedFile) {
        self.files.entry(name.into()).or_default().push(file);
    }
}

/// Decode a request body according to its `Content-Type`.
///
/// A `Content-Type` mentioning `multipart/form-data` selects the multipart
/// decoder; anything else is treated as
/// `application/x-www-form-urlencoded`, which is what browsers send for
/// plain forms. When `max_total_size` is set and the body is larger, the
/// decode fails before any parsing.
pub fn decode(
    body: &[u8],
    content_type: &str,
    max_file_size: Option<u64>,
    max_total_size: Option<u64>,
) -> Result<FormData, DecodeError> {
    if let Some(limit) = max_total_size {
        let size = body.len() as u64;
        if size > limit {
            return Err(DecodeError::TotalSizeExceeded { size, limit });
        }
    }
    if content_type
        .to_ascii_lowercase()
        .contains("multipart/form-data")
    {
        decode_multipart(body, content_type, max_file_size)
    } else {
        Ok(decode_urlencoded(body))
    }
}

fn decode_multipart(
    body: &[u8],
    content_type: &str,
    max_file_size: Option<u64>,
) -> Result<FormData, DecodeError> {
    let boundary = extract_boundary(content_type).ok_or(DecodeError::MissingBoundary)?;
    let delimiter = format!("--{boundary}").into_bytes();

    let mut form = FormData::new();
    let mut pieces = split_on(body, &delimiter);
    if !pieces.is_empty() {
        // Everything before the first boundary is preamble.
        pieces.remove(0);
    }
    for piece in pieces {
        if piece.starts_with(b"--") {
            // Closing `--<boundary>--` marker; anything after is epilogue.
            break;
        }
        let piece = strip_leading_newline(piece);
        if piece.is_empty() {
            continue;
        }
        let (header_block, content) = split_part(piece);
        let content = strip_trailing_newline(content);
        let headers = PartHeaders::parse(header_block);

        let disposition = headers.content_disposition.unwrap_or_default();
        let name = param_value(&disposition, &NAME_PARAM_RE).unwrap_or_default();
        match param_value(&disposition, &FILENAME_PARAM_RE) {
            Some(filename) => {
                if let Some(limit) = max_file_size {
                    let size = content.len() as u64;
                    if size > limit {
                        return Err(DecodeError::FileSizeExceeded {
                            filename,
                            size,
                            limit,
                        });
                    }
                }
                let content_type = headers
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_owned());
                form.push_file(
                    name,
                    UploadedFile {
                        filename,
                        content: Bytes::copy_from_slice(content),
                        content_type,
                    },
                );
            }
            None => {
                // Character decoding failures degrade to an empty value
                // rather than aborting the whole form.
                let value = std::str::from_utf8(content)
                    .map(str::to_owned)
                    .unwrap_or_default();
                form.push_field(name, value);
            }
        }
    }
    Ok(form)
}

fn decode_urlencoded(body: &[u8]) -> FormData {
    let mut form = FormData::new();
    for (name, value) in form_urlencoded::parse(body) {
        form.push_field(name.into_owned(), value.into_owned());
    }
    form
}

/// Extract the (possibly quoted) `boundary=` parameter.
fn extract_boundary(content_type: &str) -> Option<String> {
    let mime: Mime = content_type.parse().ok()?;
    let raw = mime.get_param(mime::BOUNDARY)?.as_str();
    let boundary = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(raw);
    if boundary.is_empty() {
        return None;
    }
    Some(boundary.to_owned())
}

/// Split a part into its header block and content, separated by a blank
/// line (`\r\n\r\n`, or bare `\n\n` from non-conforming clients).
fn split_part(part: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(part, b"\r\n\r\n") {
        (&part[..pos], &part[pos + 4..])
    } else if let Some(pos) = find(part, b"\n\n") {
        (&part[..pos], &part[pos + 2..])
    } else {
        (part, &[])
    }
}

fn strip_leading_newline(data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = data.strip_prefix(b"\n") {
        rest
    } else {
        data
    }
}

/// Remove the single CRLF (or LF) that separates the content from the next
/// boundary. Exactly one; trailing newlines that belong to the content
/// itself are preserved.
fn strip_trailing_newline(data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_suffix(b"\r\n") {
        rest
    } else if let Some(rest) = data.strip_suffix(b"\n") {
        rest
    } else {
        data
    }
}

#[derive(Debug, Default)]
struct PartHeaders {
    content_disposition: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    /// Parse a part's header block. Names match case-insensitively;
    /// unknown headers are ignored.
    fn parse(block: &[u8]) -> Self {
        let mut headers = Self::default();
        for line in block.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let name = String::from_utf8_lossy(&line[..colon]);
            let value = String::from_utf8_lossy(&line[colon + 1..]);
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("content-disposition") {
                headers.content_disposition = Some(value.to_owned());
            } else if name.trim().eq_ignore_ascii_case("content-type") {
                headers.content_type = Some(value.to_owned());
            }
        }
        headers
    }
}

/// Extract a `Content-Disposition` parameter value, quoted or bare. A
/// quoted empty value yields `Some("")`.
fn param_value(header: &str, re: &Regex) -> Option<String> {
    let caps = re.captures(header)?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default();
    Some(value.to_owned())
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(pos) = find(&haystack[start..], needle) {
        pieces.push(&haystack[start..start + pos]);
        start += pos + needle.len();
    }
    pieces.push(&haystack[start..]);
    pieces
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=XBOUNDARY";

    fn multipart_body(parts: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for part in parts {
            body.push_str("--XBOUNDARY\r\n");
            body.push_str(part);
            body.push_str("\r\n");
        }
        body.push_str("--XBOUNDARY--\r\n");
        body.into_bytes()
    }

    #[test]
    fn total_cap_is_checked_before_parsing() {
        // No boundary in the content type, but the cap fires first.
        let err = decode(&[0u8; 100], "multipart/form-data", None, Some(50)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TotalSizeExceeded { size: 100, limit: 50 }
        ));
    }

    #[test]
    fn missing_boundary_is_rejected() {
        let err = decode(b"x", "multipart/form-data", None, None).unwrap_err();
        assert!(matches!(err, DecodeError::MissingBoundary));
        assert!(!err.is_size_limit());
    }

    #[test]
    fn parses_simple_field() {
        let body = multipart_body(&[
            "Content-Disposition: form-data; name=\"greeting\"\r\n\r\nhello world",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        assert_eq!(form.fields["greeting"], vec!["hello world"]);
        assert!(form.files.is_empty());
    }

    #[test]
    fn quoted_boundary_is_accepted() {
        let body = multipart_body(&["Content-Disposition: form-data; name=\"a\"\r\n\r\n1"]);
        let ct = "multipart/form-data; boundary=\"XBOUNDARY\"";
        let form = decode(&body, ct, None, None).unwrap();
        assert_eq!(form.fields["a"], vec!["1"]);
    }

    #[test]
    fn repeated_names_preserve_order() {
        let body = multipart_body(&[
            "Content-Disposition: form-data; name=\"choice\"\r\n\r\na",
            "Content-Disposition: form-data; name=\"choice\"\r\n\r\nb",
            "Content-Disposition: form-data; name=\"choice\"\r\n\r\nc",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        assert_eq!(form.fields["choice"], vec!["a", "b", "c"]);
    }

    #[test]
    fn filename_marks_a_file_part_even_when_empty() {
        let body = multipart_body(&[
            "Content-Disposition: form-data; name=\"upload\"; filename=\"\"\r\n\r\n",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        assert!(form.fields.is_empty());
        let files = &form.files["upload"];
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "");
        assert_eq!(files[0].content_type, "application/octet-stream");
    }

    #[test]
    fn file_part_keeps_declared_content_type() {
        let body = multipart_body(&[
            "Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nHello, World!",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        let file = &form.files["doc"][0];
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(&file.content[..], b"Hello, World!");
        assert_eq!(file.size(), 13);
    }

    #[test]
    fn filename_in_disposition_does_not_leak_into_name() {
        // `filename=` must not satisfy the `name=` lookup.
        let body = multipart_body(&[
            "Content-Disposition: form-data; filename=\"a.txt\"\r\n\r\nx",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        let (name, files) = form.files.first().expect("one file entry");
        assert_eq!(name, "");
        assert_eq!(files[0].filename, "a.txt");
    }

    #[test]
    fn missing_name_still_records_an_entry() {
        let body = multipart_body(&["Content-Disposition: form-data\r\n\r\nvalue"]);
        let form = decode(&body, CT, None, None).unwrap();
        assert_eq!(form.fields[""], vec!["value"]);
    }

    #[test]
    fn file_over_per_file_cap_is_rejected() {
        let body = multipart_body(&[
            "Content-Disposition: form-data; name=\"doc\"; filename=\"big.bin\"\r\n\r\n0123456789",
        ]);
        let err = decode(&body, CT, Some(5), None).unwrap_err();
        match err {
            DecodeError::FileSizeExceeded { filename, size, limit } => {
                assert_eq!(filename, "big.bin");
                assert_eq!(size, 10);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            decode(&body, CT, Some(10), None).is_ok(),
            "exactly at the cap is allowed"
        );
    }

    #[test]
    fn invalid_utf8_field_degrades_to_empty_string() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XBOUNDARY\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"blob\"\r\n\r\n");
        body.extend_from_slice(&[0xff, 0xfe, 0x00]);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");
        let form = decode(&body, CT, None, None).unwrap();
        assert_eq!(form.fields["blob"], vec![""]);
    }

    #[test]
    fn bare_lf_separators_are_tolerated() {
        let body = b"--XBOUNDARY\nContent-Disposition: form-data; name=\"a\"\n\nhello\n--XBOUNDARY--\n";
        let form = decode(body, CT, None, None).unwrap();
        assert_eq!(form.fields["a"], vec!["hello"]);
    }

    #[test]
    fn only_one_trailing_newline_is_trimmed() {
        // Content that itself ends with CRLF keeps it; only the boundary
        // separator is removed.
        let body = b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nline\r\n\r\n--XBOUNDARY--\r\n";
        let form = decode(body.as_slice(), CT, None, None).unwrap();
        assert_eq!(form.fields["a"], vec!["line\r\n"]);
    }

    #[test]
    fn headers_match_case_insensitively() {
        let body = multipart_body(&[
            "CONTENT-DISPOSITION: FORM-DATA; NAME=\"a\"; FILENAME=\"f.bin\"\r\nCONTENT-TYPE: image/png\r\n\r\nx",
        ]);
        let form = decode(&body, CT, None, None).unwrap();
        let file = &form.files["a"][0];
        assert_eq!(file.filename, "f.bin");
        assert_eq!(file.content_type, "image/png");
    }

    #[test]
    fn urlencoded_round_trip() {
        let form = decode(b"x=hello&y=a+b%21", "application/x-www-form-urlencoded", None, None)
            .unwrap();
        assert_eq!(form.fields["x"], vec!["hello"]);
        assert_eq!(form.fields["y"], vec!["a b!"]);
    }

    #[test]
    fn urlencoded_preserves_blank_values_and_repeats() {
        let form = decode(
            b"a=&choice=1&choice=2&choice=3",
            "application/x-www-form-urlencoded",
            None,
            None,
        )
        .unwrap();
        assert_eq!(form.fields["a"], vec![""]);
        assert_eq!(form.fields["choice"], vec!["1", "2", "3"]);
    }
}
