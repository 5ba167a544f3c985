//! Locating the build description for a build context.

use std::io::{self, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use dockersource_core::error::{Result, WrapperError};
use tempfile::NamedTempFile;

use crate::extract::extract_description;

/// Context argument meaning "read the context from standard input".
pub const STDIN_CONTEXT: &str = "-";

/// URL schemes the build tool would fetch itself.
const REMOTE_SCHEMES: &[&str] = &["http", "https", "git"];

/// Where the build context comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildContext {
    /// `-`: a tarball or bare Dockerfile piped on stdin
    Stdin,
    /// Directory or URL as given on the command line
    Path(String),
}

impl BuildContext {
    pub fn from_arg(arg: &str) -> Self {
        if arg == STDIN_CONTEXT {
            BuildContext::Stdin
        } else {
            BuildContext::Path(arg.to_string())
        }
    }
}

impl std::fmt::Display for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildContext::Stdin => f.write_str(STDIN_CONTEXT),
            BuildContext::Path(p) => f.write_str(p),
        }
    }
}

/// Read the build description `name` for `context`.
///
/// Anything read from stdin is spooled and handed back as the process's
/// stdin, so the real build tool still receives the complete stream.
pub fn read_description(context: &BuildContext, name: &str) -> Result<Vec<u8>> {
    match context {
        BuildContext::Stdin => {
            let spool = spool_stdin()?;
            let data = extract_description(spool.reopen()?, name)?;
            restore_stdin(&spool)?;
            Ok(data)
        }
        BuildContext::Path(_) if name == STDIN_CONTEXT => {
            // `-f -`: the Dockerfile itself is piped in.
            let spool = spool_stdin()?;
            let data = std::fs::read(spool.path())?;
            restore_stdin(&spool)?;
            Ok(data)
        }
        BuildContext::Path(context) => read_from_path(context, name),
    }
}

fn read_from_path(context: &str, name: &str) -> Result<Vec<u8>> {
    if let Some(scheme) = remote_scheme(context) {
        return Err(WrapperError::UnsupportedContextScheme(scheme));
    }

    let name_path = Path::new(name);
    let path = if name_path.is_absolute() {
        name_path.to_path_buf()
    } else if Path::new(context).exists() {
        Path::new(context).join(name)
    } else {
        return Err(not_found(context, name));
    };

    tracing::debug!(path = %path.display(), "Reading build description");
    std::fs::read(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => not_found(context, name),
        _ => WrapperError::ExtractionError(format!(
            "error reading {}: {}",
            path.display(),
            e
        )),
    })
}

fn not_found(context: &str, name: &str) -> WrapperError {
    WrapperError::DescriptionNotFound {
        name: name.to_string(),
        context: context.to_string(),
    }
}

/// Scheme of a remote context the wrapper cannot read, if any.
fn remote_scheme(context: &str) -> Option<String> {
    if context.starts_with("git@") {
        return Some("git".to_string());
    }
    let (scheme, _) = context.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    REMOTE_SCHEMES.contains(&scheme.as_str()).then_some(scheme)
}

fn spool_stdin() -> Result<NamedTempFile> {
    let mut spool = tempfile::Builder::new()
        .prefix("dockersource-stdin-")
        .tempfile()?;
    let copied = io::copy(&mut io::stdin().lock(), spool.as_file_mut())?;
    spool.as_file_mut().seek(SeekFrom::Start(0))?;
    tracing::debug!(bytes = copied, "Spooled stdin context");
    Ok(spool)
}

/// Install a fresh handle on the spooled data as fd 0.
fn restore_stdin(spool: &NamedTempFile) -> Result<()> {
    let file = spool.reopen()?;
    // SAFETY: both descriptors are valid for the duration of the call.
    let rc = unsafe { libc::dup2(file.as_raw_fd(), libc::STDIN_FILENO) };
    if rc < 0 {
        return Err(WrapperError::ExtractionError(format!(
            "error duping temp context file to stdin: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_arg() {
        assert_eq!(BuildContext::from_arg("-"), BuildContext::Stdin);
        assert_eq!(
            BuildContext::from_arg("."),
            BuildContext::Path(".".to_string())
        );
        assert_ne!(BuildContext::from_arg(""), BuildContext::Stdin);
    }

    #[test]
    fn test_reads_from_context_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let ctx = BuildContext::Path(dir.path().to_str().unwrap().to_string());

        assert_eq!(read_description(&ctx, "Dockerfile").unwrap(), b"FROM alpine\n");
    }

    #[test]
    fn test_absolute_name_ignores_context() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("build.Dockerfile");
        std::fs::write(&file, "FROM busybox\n").unwrap();
        let ctx = BuildContext::Path("/definitely/not/here".to_string());

        assert_eq!(
            read_description(&ctx, file.to_str().unwrap()).unwrap(),
            b"FROM busybox\n"
        );
    }

    #[test]
    fn test_missing_description() {
        let dir = TempDir::new().unwrap();
        let ctx = BuildContext::Path(dir.path().to_str().unwrap().to_string());
        assert!(matches!(
            read_description(&ctx, "Dockerfile"),
            Err(WrapperError::DescriptionNotFound { .. })
        ));

        let ctx = BuildContext::Path("/definitely/not/here".to_string());
        let err = read_description(&ctx, "Dockerfile").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to locate Dockerfile in context /definitely/not/here"
        );
    }

    #[test]
    fn test_remote_contexts_rejected() {
        for (context, scheme) in [
            ("https://github.com/org/repo.git", "https"),
            ("http://example.com/context.tar.gz", "http"),
            ("git://github.com/org/repo", "git"),
            ("git@github.com:org/repo.git", "git"),
        ] {
            match read_description(&BuildContext::Path(context.to_string()), "Dockerfile") {
                Err(WrapperError::UnsupportedContextScheme(s)) => assert_eq!(s, scheme),
                other => panic!("unexpected result for {context}: {other:?}"),
            }
        }
    }
}
