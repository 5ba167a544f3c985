//! Invocation planning.
//!
//! Turns the caller's docker command line into an [`ExecutionPlan`]: either
//! the unchanged command (anything that is not a build), or a rewritten
//! build with the substitution flags injected. Nothing here execs; see
//! [`crate::exec`].

use std::ffi::OsString;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use dockersource_core::error::{Result, WrapperError};
use dockersource_core::WrapperConfig;

use crate::args::{classify, InvocationState};
use crate::context::{read_description, BuildContext};
use crate::frontend::{DockerfileFrontend, Frontend};
use crate::generate::{generate, meta_resolver};
use crate::path::PathResolver;
use crate::policy::SubstitutionPolicy;
use crate::source::SubstitutionResult;

/// Name of the wrapped executable.
pub const DOCKER_BIN: &str = "docker";

/// Marker in `build --help` output when the legacy builder accepts
/// `--build-context`.
const BUILD_CONTEXT_FLAG: &str = "--build-context";

const METADATA_PREFIX: &str = "metadata-";
const METADATA_NAME_ATTEMPTS: usize = 100;
const METADATA_DIR_MODE: u32 = 0o750;

/// Copy of the injected metadata file to where the caller asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCopy {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// What to run once planning is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Replace this process with the real executable.
    ReplaceProcess {
        binary: PathBuf,
        args: Vec<String>,
        env: Vec<(OsString, OsString)>,
    },
    /// Run the real executable as a child, then copy its metadata file.
    SupervisedChild {
        binary: PathBuf,
        args: Vec<String>,
        env: Vec<(OsString, OsString)>,
        copy_metadata: MetadataCopy,
    },
}

impl ExecutionPlan {
    pub fn binary(&self) -> &Path {
        match self {
            ExecutionPlan::ReplaceProcess { binary, .. }
            | ExecutionPlan::SupervisedChild { binary, .. } => binary,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            ExecutionPlan::ReplaceProcess { args, .. }
            | ExecutionPlan::SupervisedChild { args, .. } => args,
        }
    }
}

/// Asks the real executable what it supports.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Whether `build` accepts `--build-context` without `buildx`.
    async fn supports_build_context(&self, binary: &Path) -> bool;
}

/// Probe that greps `docker build --help`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelpProbe;

#[async_trait]
impl CapabilityProbe for HelpProbe {
    async fn supports_build_context(&self, binary: &Path) -> bool {
        let output = tokio::process::Command::new(binary)
            .args(["build", "--help"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                if !output.status.success() {
                    tracing::debug!(status = %output.status, "build --help failed");
                }
                String::from_utf8_lossy(&output.stdout).contains(BUILD_CONTEXT_FLAG)
                    || String::from_utf8_lossy(&output.stderr).contains(BUILD_CONTEXT_FLAG)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Could not probe build --help");
                false
            }
        }
    }
}

/// Plans one docker invocation.
pub struct Orchestrator<'a> {
    config: &'a WrapperConfig,
    locator: &'a PathResolver,
    probe: Box<dyn CapabilityProbe + 'a>,
    frontend: Box<dyn Frontend + 'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a WrapperConfig, locator: &'a PathResolver) -> Self {
        Self {
            config,
            locator,
            probe: Box::new(HelpProbe),
            frontend: Box::new(DockerfileFrontend),
        }
    }

    pub fn with_probe(mut self, probe: impl CapabilityProbe + 'a) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_frontend(mut self, frontend: impl Frontend + 'a) -> Self {
        self.frontend = Box::new(frontend);
        self
    }

    /// Plan `args` (argv without argv[0]) run with environment `env`.
    pub async fn plan(
        &self,
        args: &[String],
        env: Vec<(OsString, OsString)>,
    ) -> Result<ExecutionPlan> {
        let binary = self
            .locator
            .find(DOCKER_BIN)
            .ok_or_else(|| WrapperError::ExecutableNotFound(DOCKER_BIN.to_string()))?;
        tracing::debug!(binary = %binary.display(), "Found real executable");

        let state = classify(args, self.config)?;
        if !state.build {
            return Ok(ExecutionPlan::ReplaceProcess {
                binary,
                args: args.to_vec(),
                env,
            });
        }

        // Checked before the probe or any other subprocess runs.
        self.config.validate()?;

        let context = state
            .context
            .as_ref()
            .ok_or(WrapperError::MissingContext)?;

        let mut args = args.to_vec();
        for &pos in state.filter_flags.iter().rev() {
            args.remove(pos);
        }

        if !state.buildx && !self.probe.supports_build_context(&binary).await {
            tracing::debug!("Injecting buildx into args");
            args.insert(state.build_pos, "buildx".to_string());
        }

        let mut copy_metadata = None;
        if let Some(meta) = self.metadata_path()? {
            if let Some(requested) = &state.metadata_file {
                if Path::new(requested) != meta.as_path() {
                    tracing::debug!(
                        requested = %requested,
                        injected = %meta.display(),
                        "Caller requested its own metadata file, copying after build"
                    );
                    copy_metadata = Some(MetadataCopy {
                        from: meta.clone(),
                        to: PathBuf::from(requested),
                    });
                }
            }
            args.push("--metadata-file".to_string());
            args.push(meta.to_string_lossy().into_owned());
        }

        if let Some(syntax) = &self.config.syntax {
            args.push(format!("--build-arg=BUILDKIT_SYNTAX={}", syntax));
        }

        let result = self.substitutions(&state, context).await?;
        self.inject_flags(&mut args, &state, &result);

        tracing::debug!(binary = %binary.display(), args = %args.join(" "), "Planned build");
        Ok(match copy_metadata {
            Some(copy_metadata) => ExecutionPlan::SupervisedChild {
                binary,
                args,
                env,
                copy_metadata,
            },
            None => ExecutionPlan::ReplaceProcess { binary, args, env },
        })
    }

    /// Metadata file to inject, if configured.
    fn metadata_path(&self) -> Result<Option<PathBuf>> {
        if let Some(dir) = &self.config.metadata_dir {
            DirBuilder::new()
                .recursive(true)
                .mode(METADATA_DIR_MODE)
                .create(dir)
                .map_err(|e| {
                    WrapperError::ConfigError(format!(
                        "failed to create buildkit metadata dir {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            return random_file_name(dir, METADATA_PREFIX, ".json").map(Some);
        }
        Ok(self.config.metadata_file.clone())
    }

    async fn substitutions(
        &self,
        state: &InvocationState,
        context: &BuildContext,
    ) -> Result<SubstitutionResult> {
        if let Some(path) = &self.config.mod_path {
            tracing::debug!(path = %path.display(), "Using precomputed substitution result");
            return SubstitutionResult::load(path);
        }

        let description = read_description(context, &state.dockerfile_name)?;
        let policy = SubstitutionPolicy::from_config(
            self.config.mod_prog.as_deref(),
            self.config.mod_config.as_deref(),
        )?;
        let resolver = meta_resolver(
            self.config.resolve_remote,
            self.config.docker_config.as_deref(),
        );

        generate(
            self.frontend.as_ref(),
            resolver.as_ref(),
            &policy,
            &description,
            &state.build_args,
        )
        .await
    }

    fn inject_flags(
        &self,
        args: &mut Vec<String>,
        state: &InvocationState,
        result: &SubstitutionResult,
    ) {
        let config = self.config;

        args.extend(state.outputs.iter().map(|o| format!("--output={}", o)));
        if config.load {
            args.push("--load".to_string());
        }
        if let Some(cache_from) = &config.cache_from {
            args.push(format!("--cache-from={}", cache_from));
        }
        if let Some(cache_to) = &config.cache_to {
            args.push(format!("--cache-to={}", cache_to));
        }
        if let Some(platform) = &config.platform {
            args.push(format!("--platform={}", platform));
        }
        args.extend(state.tags.iter().map(|t| format!("-t={}", t)));
        args.extend(
            result
                .sources
                .iter()
                .filter_map(|s| s.build_context())
                .map(|ctx| format!("--build-context={}", ctx)),
        );
    }
}

/// Pick an unused `<prefix><8 hex><suffix>` path inside `dir`.
fn random_file_name(dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
    for _ in 0..METADATA_NAME_ATTEMPTS {
        let id: [u8; 4] = rand::random();
        let candidate = dir.join(format!("{}{}{}", prefix, hex::encode(id), suffix));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(WrapperError::Other(
        "could not get random filename for buildkit metadata".to_string(),
    ))
}
