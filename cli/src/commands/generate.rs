//! Standalone generator: print the substitution result for a Dockerfile.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use dockersource_core::config::{ENV_MOD_CONFIG, ENV_MOD_FORMAT, ENV_MOD_PROG};
use dockersource_core::error::{Result, WrapperError};
use dockersource_core::WrapperConfig;
use dockersource_runtime::{
    extract_description, generate, meta_resolver, DockerfileFrontend, SubstitutionPolicy,
    SubstitutionResult, DEFAULT_DOCKERFILE,
};

/// Print the base image substitutions for a Dockerfile.
#[derive(Parser, Debug)]
#[command(name = "dockersource", version, about)]
pub struct Cli {
    /// Build arg for the Dockerfile (KEY=VALUE); needed when args pick base images
    #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = parse_build_arg)]
    pub build_args: Vec<(String, String)>,

    /// Program deciding the replacement for each reference
    #[arg(long, env = ENV_MOD_PROG)]
    pub mod_prog: Option<String>,

    /// Rules file, or config passed to the mod program
    #[arg(long, env = ENV_MOD_CONFIG)]
    pub mod_config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, env = ENV_MOD_FORMAT, default_value_t = OutputFormat::Modfile)]
    pub format: OutputFormat,

    /// Fetch real image metadata from the registry
    #[arg(long)]
    pub resolve_remote: bool,

    /// Dockerfile to read; `-` or nothing reads stdin when it is piped
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Substitution result JSON
    Modfile,
    /// `--build-context` flags for `docker buildx build`
    BuildFlags,
}

fn parse_build_arg(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| "expected format <key>=<value>".to_string())
}

pub async fn execute(cli: Cli, config: &WrapperConfig) -> Result<()> {
    let description = read_input(cli.file.as_deref())?;
    let build_args: HashMap<String, String> = cli.build_args.into_iter().collect();

    let policy = SubstitutionPolicy::from_config(cli.mod_prog.as_deref(), cli.mod_config.as_deref())?;
    let resolver = meta_resolver(
        cli.resolve_remote || config.resolve_remote,
        config.docker_config.as_deref(),
    );
    let result = generate(
        &DockerfileFrontend,
        resolver.as_ref(),
        &policy,
        &description,
        &build_args,
    )
    .await?;

    println!("{}", render(&result, cli.format)?);
    Ok(())
}

fn render(result: &SubstitutionResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Modfile => result.to_json(),
        OutputFormat::BuildFlags => Ok(result.as_flags()),
    }
}

fn read_input(file: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) if path.as_os_str() != "-" => {
            let f = File::open(path).map_err(|e| {
                WrapperError::ExtractionError(format!("error opening {}: {}", path.display(), e))
            })?;
            extract_description(f, DEFAULT_DOCKERFILE)
        }
        _ if !io::stdin().is_terminal() => {
            tracing::debug!("Reading Dockerfile from stdin");
            extract_description(io::stdin(), DEFAULT_DOCKERFILE)
        }
        _ => {
            let f = File::open(DEFAULT_DOCKERFILE).map_err(|e| {
                WrapperError::ExtractionError(format!("error opening {}: {}", DEFAULT_DOCKERFILE, e))
            })?;
            extract_description(f, DEFAULT_DOCKERFILE)
        }
    }
}
