//! Persistence of decoded file parts into the run's upload directory.

use std::io::ErrorKind;
use std::io::Result as IoResult;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::form::UploadedFile;

/// A file that has been written to the upload directory.
///
/// The record outlives the server; `size_bytes` equals the byte length of
/// the file at `stored_path` for as long as the process leaves it alone.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// The filename exactly as the client sent it.
    pub original_filename: String,
    /// Absolute path of the stored file.
    pub stored_path: PathBuf,
    /// Exact number of bytes received and written.
    pub size_bytes: u64,
    /// MIME type claimed by the part, `application/octet-stream` when the
    /// part carried none.
    pub content_type: String,
}

/// Reduce a client-supplied filename to something safe to create inside
/// the upload directory.
///
/// Backslashes count as path separators regardless of platform, only the
/// final segment survives, anything outside `[A-Za-z0-9 _.-]` becomes `_`,
/// the result is capped at 255 characters, and degenerate names fall back
/// to `upload`.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let unified = filename.replace('\\', "/");
    let basename = unified.rsplit('/').next().unwrap_or("");
    let mut name: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.chars().count() > 255 {
        name = name.chars().take(255).collect();
    }
    if name.is_empty() || name == "." || name == ".." {
        name = "upload".to_owned();
    }
    name
}

/// Write an uploaded file into `directory` and return its metadata.
///
/// Colliding names get `_1`, `_2`, … appended before the extension. The
/// file is created with `create_new`, so concurrent stores of the same
/// name race safely on the filesystem's exclusive-create semantics.
pub async fn store_file(file: &UploadedFile, directory: &Path) -> IoResult<StoredFile> {
    let base = sanitize_filename(&file.filename);
    let (stem, ext) = split_extension(&base);
    let mut counter = 0u32;
    loop {
        let candidate = if counter == 0 {
            base.clone()
        } else {
            format!("{stem}_{counter}{ext}")
        };
        let path = directory.join(candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut out) => {
                out.write_all(&file.content).await?;
                out.sync_all().await?;
                return Ok(StoredFile {
                    original_filename: file.filename.clone(),
                    stored_path: path,
                    size_bytes: file.content.len() as u64,
                    content_type: file.content_type.clone(),
                });
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => counter += 1,
            Err(err) => return Err(err),
        }
    }
}

/// Split `name.ext` so the collision counter lands before the extension.
/// A leading dot does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::tempdir;

    use super::*;

    fn upload(filename: &str, content: &[u8]) -> UploadedFile {
        UploadedFile {
            filename: filename.to_owned(),
            content: Bytes::copy_from_slice(content),
            content_type: "application/octet-stream".to_owned(),
        }
    }

    #[test]
    fn sanitize_strips_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("/tmp/evil.sh"), "evil.sh");
        assert_eq!(sanitize_filename(r"C:\Users\me\doc.txt"), "doc.txt");
    }

    #[test]
    fn sanitize_replaces_hostile_characters() {
        assert_eq!(sanitize_filename("a<b>c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename("my file.tar.gz"), "my file.tar.gz");
        assert_eq!(sanitize_filename("naïve.txt"), "na_ve.txt");
    }

    #[test]
    fn sanitize_handles_degenerate_names() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("."), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "x".repeat(1000);
        assert_eq!(sanitize_filename(&long).chars().count(), 255);
    }

    #[test]
    fn extension_split() {
        assert_eq!(split_extension("a.txt"), ("a", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("noext"), ("noext", ""));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
    }

    #[tokio::test]
    async fn stores_bytes_exactly() {
        let dir = tempdir().expect("tempdir");
        let stored = store_file(&upload("hello.txt", b"Hello, World!"), dir.path())
            .await
            .expect("store");
        assert_eq!(stored.size_bytes, 13);
        assert_eq!(stored.original_filename, "hello.txt");
        let on_disk = std::fs::read(&stored.stored_path).expect("read back");
        assert_eq!(on_disk, b"Hello, World!");
    }

    #[tokio::test]
    async fn colliding_names_get_distinct_paths() {
        let dir = tempdir().expect("tempdir");
        let mut paths = Vec::new();
        for content in [b"one".as_slice(), b"two", b"three"] {
            let stored = store_file(&upload("report.txt", content), dir.path())
                .await
                .expect("store");
            paths.push(stored.stored_path);
        }
        assert_eq!(paths[0].file_name().and_then(|n| n.to_str()), Some("report.txt"));
        assert_eq!(paths[1].file_name().and_then(|n| n.to_str()), Some("report_1.txt"));
        assert_eq!(paths[2].file_name().and_then(|n| n.to_str()), Some("report_2.txt"));
        assert_eq!(std::fs::read(&paths[2]).expect("read back"), b"three");
    }

    #[tokio::test]
    async fn collisions_without_extension() {
        let dir = tempdir().expect("tempdir");
        let first = store_file(&upload("", b"a"), dir.path()).await.expect("store");
        let second = store_file(&upload("", b"b"), dir.path()).await.expect("store");
        assert_eq!(first.stored_path.file_name().and_then(|n| n.to_str()), Some("upload"));
        assert_eq!(second.stored_path.file_name().and_then(|n| n.to_str()), Some("upload_1"));
    }
}
