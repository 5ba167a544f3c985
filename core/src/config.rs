//! Environment-driven wrapper configuration.
//!
//! Every knob is read once at process start into [`WrapperConfig`]; the
//! rest of the crate only ever sees the struct.

use std::path::PathBuf;

use crate::error::{Result, WrapperError};

pub const ENV_SYNTAX: &str = "BUILDKIT_SYNTAX";
pub const ENV_MOD_PATH: &str = "DOCKERFILE_MOD_PATH";
pub const ENV_METADATA_FILE: &str = "BUILDKIT_METADATA_FILE";
pub const ENV_METADATA_DIR: &str = "BUILDKIT_METADATA_DIR";
pub const ENV_DEBUG: &str = "DEBUG";
pub const ENV_LOAD: &str = "BUILDX_LOAD";
pub const ENV_CACHE_FROM: &str = "BUILDKIT_CACHE_FROM";
pub const ENV_CACHE_TO: &str = "BUILDKIT_CACHE_TO";
pub const ENV_PLATFORM: &str = "BUILDKIT_PLATFORM";
pub const ENV_TAG: &str = "BUILDKIT_TAG";
pub const ENV_OUTPUT: &str = "BUILDKIT_OUTPUT";
pub const ENV_INVOKE_DOCKER: &str = "DOCKERFILE_MOD_INVOKE_DOCKER";
pub const ENV_MOD_PROG: &str = "DOCKERFILE_MOD_PROG";
pub const ENV_MOD_CONFIG: &str = "DOCKERFILE_MOD_CONFIG";
pub const ENV_MOD_FORMAT: &str = "DOCKERFILE_MOD_FORMAT";
pub const ENV_RESOLVE_REMOTE: &str = "DOCKERFILE_MOD_RESOLVE_REMOTE";
pub const ENV_DOCKER_CONFIG: &str = "DOCKER_CONFIG";
pub const ENV_PATH: &str = "PATH";

/// Separator between entries of `BUILDKIT_OUTPUT`.
const OUTPUT_SEPARATOR: char = ':';

/// Escaped form of [`OUTPUT_SEPARATOR`] that stays inside one entry.
const OUTPUT_ESCAPED_SEPARATOR: &str = "\\:";

/// Wrapper configuration, built once from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapperConfig {
    /// Custom frontend syntax image passed as `BUILDKIT_SYNTAX` build arg
    pub syntax: Option<String>,

    /// Precomputed substitution result; skips Dockerfile evaluation
    pub mod_path: Option<PathBuf>,

    /// Where the build tool should write its metadata file
    pub metadata_file: Option<PathBuf>,

    /// Directory for auto-named metadata files
    pub metadata_dir: Option<PathBuf>,

    /// Debug logging
    pub debug: bool,

    /// Force `--load`
    pub load: bool,

    pub cache_from: Option<String>,
    pub cache_to: Option<String>,
    pub platform: Option<String>,

    /// Forced tag list; replaces caller-supplied tags
    pub tags: Vec<String>,

    /// Forced output specs; replace caller-supplied outputs
    pub outputs: Vec<String>,

    /// Act as the real tool regardless of argv[0] and search own directory
    pub invoke_docker: bool,

    /// External program deciding replacements
    pub mod_prog: Option<String>,

    /// Rules file, or config path handed to `mod_prog` as `MOD_CONFIG`
    pub mod_config: Option<PathBuf>,

    /// Resolve image metadata against the registry instead of a fixed digest
    pub resolve_remote: bool,

    /// Docker client config directory holding registry credentials
    pub docker_config: Option<PathBuf>,

    /// Search path for the real executable
    pub search_path: Option<String>,
}

impl WrapperConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let load = match get(ENV_LOAD) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                tracing::debug!(value = %raw, "Ignoring unparsable {}", ENV_LOAD);
                false
            }),
            None => false,
        };

        Self {
            syntax: get(ENV_SYNTAX),
            mod_path: get(ENV_MOD_PATH).map(PathBuf::from),
            metadata_file: get(ENV_METADATA_FILE).map(PathBuf::from),
            metadata_dir: get(ENV_METADATA_DIR).map(PathBuf::from),
            debug: get(ENV_DEBUG).is_some(),
            load,
            cache_from: get(ENV_CACHE_FROM),
            cache_to: get(ENV_CACHE_TO),
            platform: get(ENV_PLATFORM),
            tags: get(ENV_TAG).map(|v| split_tags(&v)).unwrap_or_default(),
            outputs: get(ENV_OUTPUT).map(|v| split_outputs(&v)).unwrap_or_default(),
            invoke_docker: get(ENV_INVOKE_DOCKER).as_deref() == Some("1"),
            mod_prog: get(ENV_MOD_PROG),
            mod_config: get(ENV_MOD_CONFIG).map(PathBuf::from),
            resolve_remote: get(ENV_RESOLVE_REMOTE)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            docker_config: get(ENV_DOCKER_CONFIG).map(PathBuf::from),
            search_path: lookup(ENV_PATH),
        }
    }

    /// Reject settings that cannot be honored together.
    pub fn validate(&self) -> Result<()> {
        if self.metadata_dir.is_some() && self.metadata_file.is_some() {
            return Err(WrapperError::ConfigConflict(format!(
                "both {} and {} are set but are mutually exclusive",
                ENV_METADATA_DIR, ENV_METADATA_FILE
            )));
        }
        Ok(())
    }
}

/// Parse a boolean the way Go's `strconv.ParseBool` does.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split `BUILDKIT_OUTPUT` into individual output specs.
///
/// Entries are separated by `:` or newlines; `\:` is a literal colon.
fn split_outputs(raw: &str) -> Vec<String> {
    let escaped = raw.replace(OUTPUT_ESCAPED_SEPARATOR, "\0");
    escaped
        .split(OUTPUT_SEPARATOR)
        .flat_map(|part| part.split('\n'))
        .map(|part| part.replace('\0', ":"))
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> WrapperConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WrapperConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_is_default() {
        assert_eq!(config_from(&[]), WrapperConfig::default());
    }

    #[test]
    fn test_tags_split_on_comma() {
        let config = config_from(&[(ENV_TAG, "foo:1,bar:2, baz")]);
        assert_eq!(config.tags, vec!["foo:1", "bar:2", "baz"]);
    }

    #[test]
    fn test_outputs_split_on_colon_and_newline() {
        let config = config_from(&[(ENV_OUTPUT, "type=local,dest=out:type=tar,dest=a.tar\ntype=docker")]);
        assert_eq!(
            config.outputs,
            vec!["type=local,dest=out", "type=tar,dest=a.tar", "type=docker"]
        );
    }

    #[test]
    fn test_outputs_escaped_colon_is_kept() {
        let config = config_from(&[(ENV_OUTPUT, "type=image,name=localhost\\:5000/foo,push=true")]);
        assert_eq!(
            config.outputs,
            vec!["type=image,name=localhost:5000/foo,push=true"]
        );
    }

    #[test]
    fn test_load_parsing() {
        assert!(config_from(&[(ENV_LOAD, "true")]).load);
        assert!(config_from(&[(ENV_LOAD, "1")]).load);
        assert!(!config_from(&[(ENV_LOAD, "false")]).load);
        assert!(!config_from(&[(ENV_LOAD, "yes please")]).load);
    }

    #[test]
    fn test_invoke_docker_requires_one() {
        assert!(config_from(&[(ENV_INVOKE_DOCKER, "1")]).invoke_docker);
        assert!(!config_from(&[(ENV_INVOKE_DOCKER, "true")]).invoke_docker);
    }

    #[test]
    fn test_docker_config_dir() {
        let config = config_from(&[(ENV_DOCKER_CONFIG, "/etc/ci/docker")]);
        assert_eq!(config.docker_config, Some(PathBuf::from("/etc/ci/docker")));
        assert_eq!(config_from(&[(ENV_DOCKER_CONFIG, "")]).docker_config, None);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config_from(&[(ENV_SYNTAX, ""), (ENV_DEBUG, "")]);
        assert_eq!(config.syntax, None);
        assert!(!config.debug);
    }

    #[test]
    fn test_validate_metadata_conflict() {
        let config = config_from(&[
            (ENV_METADATA_DIR, "/tmp/meta"),
            (ENV_METADATA_FILE, "/tmp/meta.json"),
        ]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, WrapperError::ConfigConflict(_)));
    }

    #[test]
    fn test_validate_ok() {
        let config = config_from(&[(ENV_METADATA_DIR, "/tmp/meta")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("T"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
