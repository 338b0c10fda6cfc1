//! Opening the served URL in a web browser.
//!
//! Launch failures are never fatal to a run; the URL is always printed so
//! the user can open it by hand.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// How the browser should be opened once the listener is bound.
#[derive(Debug, Clone)]
pub enum BrowserLaunch {
    /// Use the platform's default URL opener.
    Default,
    /// Spawn a specific browser executable with the URL as its single
    /// argument.
    Executable(PathBuf),
}

/// Open `url`, either with the platform opener or a caller-supplied
/// executable. The child is spawned directly, never through a shell
/// interpreter. Returns whether the spawn succeeded.
pub fn launch(url: &str, executable: Option<&Path>) -> bool {
    match executable {
        Some(exe) => spawn(exe, &[url]),
        None => launch_default(url),
    }
}

fn launch_default(url: &str) -> bool {
    if cfg!(target_os = "macos") {
        spawn("open", &[url])
    } else if cfg!(target_os = "windows") {
        spawn("rundll32", &["url.dll,FileProtocolHandler", url])
    } else {
        spawn("xdg-open", &[url])
    }
}

fn spawn(program: impl AsRef<std::ffi::OsStr>, args: &[&str]) -> bool {
    let program = program.as_ref();
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match result {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(
                program = %program.to_string_lossy(),
                %err,
                "failed to launch browser"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn custom_executable_spawns() {
        // `true` exists everywhere and ignores its argument.
        assert!(launch("http://127.0.0.1:1/", Some(Path::new("true"))));
    }

    #[test]
    fn missing_executable_reports_failure() {
        assert!(!launch(
            "http://127.0.0.1:1/",
            Some(Path::new("/nonexistent/browser-binary"))
        ));
    }
}
