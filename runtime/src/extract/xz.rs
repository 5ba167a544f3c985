//! xz decompression through the `xz` command line tool.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

const XZ_PROGRAM: &str = "xz";

/// Decompressor subprocess exited unsuccessfully.
///
/// Travels inside an `io::Error` so it can cross `Read` boundaries
/// (tar, buffered readers) and be recovered on the other side.
#[derive(Debug)]
pub struct SubprocessFailure {
    pub program: String,
    pub message: String,
}

impl std::fmt::Display for SubprocessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.program, self.message)
    }
}

impl std::error::Error for SubprocessFailure {}

/// Reader over `xz -d -c -q` output.
///
/// Input is fed from a background thread. Once stdout reaches EOF the
/// child is reaped; a failing exit turns that EOF into an error that
/// carries the collected stderr.
pub struct XzReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    feeder: Option<JoinHandle<()>>,
    finished: bool,
}

impl XzReader {
    pub fn spawn<R>(mut input: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let mut child = Command::new(XZ_PROGRAM)
            .args(["-d", "-c", "-q"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    SubprocessFailure {
                        program: XZ_PROGRAM.to_string(),
                        message: e.to_string(),
                    },
                )
            })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill();
                return Err(io::Error::new(io::ErrorKind::Other, "xz pipes unavailable"));
            }
        };

        let feeder = std::thread::spawn(move || {
            let mut stdin = stdin;
            if let Err(e) = io::copy(&mut input, &mut stdin).and_then(|_| stdin.flush()) {
                // xz exits early on corrupt input; its stderr explains why.
                tracing::debug!(error = %e, "Stopped feeding xz");
            }
        });

        let stderr = std::thread::spawn(move || {
            let mut stderr = stderr;
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        Ok(Self {
            child,
            stdout,
            stderr: Some(stderr),
            feeder: Some(feeder),
            finished: false,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        Err(io::Error::new(
            io::ErrorKind::Other,
            SubprocessFailure {
                program: XZ_PROGRAM.to_string(),
                message: format!("{}: {}", stderr.trim(), status),
            },
        ))
    }
}

impl Read for XzReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finish()?;
        }
        Ok(n)
    }
}

impl Drop for XzReader {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
