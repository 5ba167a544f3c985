//! Command dispatch: docker wrapper or standalone generator.

mod generate;
mod wrap;

use std::future::Future;
use std::path::Path;

use clap::Parser;
use dockersource_core::error::{Result, WrapperError};
use dockersource_core::{WrapperConfig, DIAGNOSTIC_PREFIX};
use dockersource_runtime::DOCKER_BIN;
use tokio::signal::unix::{signal, SignalKind};

pub use generate::{Cli, OutputFormat};

/// Exit status for classifier defects (EX_SOFTWARE).
pub const EXIT_INTERNAL: i32 = 70;

/// Exit status for every other fatal condition.
pub const EXIT_FAILURE: i32 = 1;

/// How this process was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stand in for the real docker CLI
    Wrap,
    /// Print the substitution result for a Dockerfile
    Generate,
}

impl Mode {
    /// Wrapper mode when installed as `docker` or forced by configuration.
    pub fn detect(argv0: &str, config: &WrapperConfig) -> Self {
        let name = Path::new(argv0).file_name().and_then(|n| n.to_str());
        if name == Some(DOCKER_BIN) || config.invoke_docker {
            Mode::Wrap
        } else {
            Mode::Generate
        }
    }
}

/// Run the process; returns the exit status.
pub async fn run(argv: Vec<String>, config: WrapperConfig) -> i32 {
    let argv0 = argv.first().cloned().unwrap_or_default();
    match Mode::detect(&argv0, &config) {
        Mode::Wrap => match cancellable(wrap::execute(&argv, &config)).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{} Error while wrapping docker cli: {}", DIAGNOSTIC_PREFIX, e);
                exit_code(&e)
            }
        },
        Mode::Generate => {
            let cli = Cli::parse_from(&argv);
            match cancellable(generate::execute(cli, &config)).await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("{} {}", DIAGNOSTIC_PREFIX, e);
                    exit_code(&e)
                }
            }
        }
    }
}

pub fn exit_code(err: &WrapperError) -> i32 {
    if err.is_internal() {
        EXIT_INTERNAL
    } else {
        EXIT_FAILURE
    }
}

/// Drive `fut` until it finishes or SIGINT/SIGTERM arrives.
///
/// On a signal the future is dropped, which kills any child it spawned.
async fn cancellable<F>(fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = fut => result,
        _ = tokio::signal::ctrl_c() => Err(WrapperError::Cancelled("interrupted".to_string())),
        _ = terminate.recv() => Err(WrapperError::Cancelled("terminated".to_string())),
    }
}
