//! Running an [`ExecutionPlan`].

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;

use dockersource_core::error::{Result, WrapperError};

use crate::orchestrator::{ExecutionPlan, MetadataCopy};

/// Carry out `plan`.
///
/// For [`ExecutionPlan::ReplaceProcess`] this only returns on failure.
pub async fn execute(plan: ExecutionPlan) -> Result<()> {
    match plan {
        ExecutionPlan::ReplaceProcess { binary, args, env } => {
            Err(replace_process(&binary, &args, env))
        }
        ExecutionPlan::SupervisedChild {
            binary,
            args,
            env,
            copy_metadata,
        } => {
            run_supervised(&binary, &args, env).await?;
            copy_metadata_file(&copy_metadata)
        }
    }
}

/// argv[0] the real tool sees: its own base name.
fn program_name(binary: &Path) -> OsString {
    binary
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| binary.as_os_str().to_os_string())
}

fn replace_process(binary: &Path, args: &[String], env: Vec<(OsString, OsString)>) -> WrapperError {
    tracing::debug!(binary = %binary.display(), args = %args.join(" "), "Replacing process");
    let err = std::process::Command::new(binary)
        .arg0(program_name(binary))
        .args(args)
        .env_clear()
        .envs(env)
        .exec();
    WrapperError::ExecFailed(err.to_string())
}

async fn run_supervised(binary: &Path, args: &[String], env: Vec<(OsString, OsString)>) -> Result<()> {
    tracing::debug!(binary = %binary.display(), args = %args.join(" "), "Running build as child");

    let mut cmd = tokio::process::Command::new(binary);
    cmd.arg0(program_name(binary))
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    #[cfg(target_os = "linux")]
    // SAFETY: prctl is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let status = cmd
        .status()
        .await
        .map_err(|e| WrapperError::ExecFailed(e.to_string()))?;
    if !status.success() {
        return Err(WrapperError::ExecFailed(status.to_string()));
    }
    Ok(())
}

/// Byte-for-byte copy of the injected metadata file.
pub fn copy_metadata_file(copy: &MetadataCopy) -> Result<()> {
    let mut src = File::open(&copy.from).map_err(|e| {
        WrapperError::Other(format!(
            "error opening metadata file {}: {}",
            copy.from.display(),
            e
        ))
    })?;
    let mut dst = File::create(&copy.to).map_err(|e| {
        WrapperError::Other(format!(
            "error creating metadata file {}: {}",
            copy.to.display(),
            e
        ))
    })?;
    let copied = io::copy(&mut src, &mut dst)?;
    tracing::debug!(
        from = %copy.from.display(),
        to = %copy.to.display(),
        bytes = copied,
        "Copied metadata file"
    );
    Ok(())
}
