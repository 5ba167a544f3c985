//! Reference substitution policy.
//!
//! Decides what a discovered image reference is replaced with: either an
//! ordered list of regex rules loaded from a JSON file, or an external
//! program asked once per unique reference.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use dockersource_core::error::{Result, WrapperError};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;

/// Environment variable through which the program sees the config path.
pub const MOD_CONFIG_ENV: &str = "MOD_CONFIG";

const NO_OUTPUT_PLACEHOLDER: &str = "<no output from program>";

/// One entry of the rules file: `{"match": "<regex>", "replace": "<template>"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubstitutionRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub replace: String,
}

/// A rule with its pattern compiled.
#[derive(Debug)]
pub struct CompiledRule {
    regex: Regex,
    replace: String,
}

/// Replacement strategy, chosen once per run.
#[derive(Debug)]
pub enum SubstitutionPolicy {
    /// First matching rule wins; no match means no substitution
    Rules(Vec<CompiledRule>),
    /// External decision program, memoized per reference
    Program(ProgramPolicy),
}

impl SubstitutionPolicy {
    /// Pick the strategy: a program when one is configured, rules otherwise.
    ///
    /// With a program, `config` is only forwarded to it. Without one,
    /// `config` names the rules file; no file means no rules.
    pub fn from_config(program: Option<&str>, config: Option<&Path>) -> Result<Self> {
        if let Some(program) = program {
            return Ok(SubstitutionPolicy::Program(ProgramPolicy::new(
                program,
                config.map(Path::to_path_buf),
            )?));
        }

        match config {
            Some(path) => Self::rules_from_file(path),
            None => Ok(SubstitutionPolicy::Rules(Vec::new())),
        }
    }

    pub fn rules_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            WrapperError::ConfigError(format!(
                "error reading mod config {}: {}",
                path.display(),
                e
            ))
        })?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(SubstitutionPolicy::Rules(Vec::new()));
        }

        let rules: Vec<SubstitutionRule> = serde_json::from_slice(&data).map_err(|e| {
            WrapperError::ConfigError(format!(
                "error parsing mod config for builtin matcher: {}",
                e
            ))
        })?;
        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<SubstitutionRule>) -> Result<Self> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    WrapperError::ConfigError(format!(
                        "error compiling matcher regex {:?}: {}",
                        rule.pattern, e
                    ))
                })?;
                Ok(CompiledRule {
                    regex,
                    replace: rule.replace,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SubstitutionPolicy::Rules(compiled))
    }

    /// Replacement for `reference`, empty when it should be left alone.
    pub async fn resolve(&self, reference: &str) -> Result<String> {
        match self {
            SubstitutionPolicy::Rules(rules) => Ok(rules
                .iter()
                .find(|rule| rule.regex.is_match(reference))
                .map(|rule| {
                    rule.regex
                        .replace(reference, rule.replace.as_str())
                        .into_owned()
                })
                .unwrap_or_default()),
            SubstitutionPolicy::Program(program) => program.resolve(reference).await,
        }
    }
}

/// External decision program.
#[derive(Debug)]
pub struct ProgramPolicy {
    argv: Vec<String>,
    config: Option<PathBuf>,
    cache: Mutex<HashMap<String, String>>,
}

impl ProgramPolicy {
    /// `command` is split on whitespace; the reference is appended last.
    pub fn new(command: &str, config: Option<PathBuf>) -> Result<Self> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(WrapperError::ConfigError(
                "mod program command is empty".to_string(),
            ));
        }
        Ok(Self {
            argv,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub async fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(hit) = self.cache.lock().get(reference) {
            return Ok(hit.clone());
        }

        let replacement = self.invoke(reference).await?;
        self.cache
            .lock()
            .insert(reference.to_string(), replacement.clone());
        Ok(replacement)
    }

    async fn invoke(&self, reference: &str) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .arg(reference)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(config) = &self.config {
            cmd.env(MOD_CONFIG_ENV, config);
        }

        tracing::debug!(program = %self.argv[0], reference, "Invoking mod program");
        let output = cmd.output().await.map_err(|e| WrapperError::DecisionProgram {
            reference: reference.to_string(),
            message: format!("{}: {}", self.argv[0], e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let diagnostic = if stderr.is_empty() {
                NO_OUTPUT_PLACEHOLDER
            } else {
                stderr
            };
            return Err(WrapperError::DecisionProgram {
                reference: reference.to_string(),
                message: format!("{}: {}", diagnostic, output.status),
            });
        }

        if !output.stderr.is_empty() {
            let _ = std::io::stderr().write_all(&output.stderr);
        }

        let replacement = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(reference, replacement = %replacement, "Mod program answered");
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn rules(pairs: &[(&str, &str)]) -> SubstitutionPolicy {
        SubstitutionPolicy::from_rules(
            pairs
                .iter()
                .map(|(m, r)| SubstitutionRule {
                    pattern: m.to_string(),
                    replace: r.to_string(),
                })
                .collect(),
        )
        .unwrap()
    }

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_rules_first_match_wins() {
        let policy = rules(&[
            ("docker.io/library/foo:1.0", "docker.io/library/bar:1.0"),
            ("docker.io/library/(.*)", "mirror.local/$1"),
        ]);
        assert_eq!(
            policy.resolve("docker.io/library/foo:1.0").await.unwrap(),
            "docker.io/library/bar:1.0"
        );
        assert_eq!(
            policy.resolve("docker.io/library/alpine:3").await.unwrap(),
            "mirror.local/alpine:3"
        );
    }

    #[tokio::test]
    async fn test_rules_no_match_is_empty() {
        let policy = rules(&[("^ghcr.io/", "mirror.local/")]);
        assert_eq!(policy.resolve("docker.io/library/foo:1.0").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_rules_replace_first_match_only() {
        let policy = rules(&[("foo", "bar")]);
        assert_eq!(
            policy.resolve("docker.io/foo/foo:1").await.unwrap(),
            "docker.io/bar/foo:1"
        );
    }

    #[tokio::test]
    async fn test_rules_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"match": "docker.io/library/foo:latest", "replace": "docker.io/library/bar:latest"}]"#,
        )
        .unwrap();

        let policy = SubstitutionPolicy::from_config(None, Some(&path)).unwrap();
        assert_eq!(
            policy.resolve("docker.io/library/foo:latest").await.unwrap(),
            "docker.io/library/bar:latest"
        );
    }

    #[test]
    fn test_rules_invalid_regex() {
        let err = SubstitutionPolicy::from_rules(vec![SubstitutionRule {
            pattern: "(unclosed".to_string(),
            replace: String::new(),
        }])
        .unwrap_err();
        assert!(matches!(err, WrapperError::ConfigError(_)));
    }

    #[test]
    fn test_rules_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            SubstitutionPolicy::rules_from_file(&path).unwrap(),
            SubstitutionPolicy::Rules(r) if r.is_empty()
        ));
    }

    #[test]
    fn test_empty_program_rejected() {
        assert!(ProgramPolicy::new("   ", None).is_err());
    }

    #[tokio::test]
    async fn test_program_output_trimmed_and_memoized() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("calls");
        let prog = script(
            &dir,
            "mod.sh",
            &format!("echo called >> {}\necho \"  mirror.local/$1  \"", counter.display()),
        );

        let policy = SubstitutionPolicy::from_config(Some(prog.to_str().unwrap()), None).unwrap();
        for _ in 0..3 {
            assert_eq!(
                policy.resolve("docker.io/library/foo:1.0").await.unwrap(),
                "mirror.local/docker.io/library/foo:1.0"
            );
        }
        policy.resolve("docker.io/library/other:1").await.unwrap();

        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_program_receives_args_and_config() {
        let dir = TempDir::new().unwrap();
        let prog = script(&dir, "mod.sh", "echo \"$1|$2|$MOD_CONFIG\"");
        let config = dir.path().join("config.json");

        let command = format!("{} --flag", prog.display());
        let policy = SubstitutionPolicy::from_config(Some(&command), Some(&config)).unwrap();
        assert_eq!(
            policy.resolve("foo").await.unwrap(),
            format!("--flag|foo|{}", config.display())
        );
    }

    #[tokio::test]
    async fn test_program_failure_without_output() {
        let dir = TempDir::new().unwrap();
        let prog = script(&dir, "fail.sh", "exit 3");

        let policy = SubstitutionPolicy::from_config(Some(prog.to_str().unwrap()), None).unwrap();
        let err = policy.resolve("foo").await.unwrap_err();
        match err {
            WrapperError::DecisionProgram { reference, message } => {
                assert_eq!(reference, "foo");
                assert!(message.contains(NO_OUTPUT_PLACEHOLDER));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_program_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let prog = script(&dir, "fail.sh", "echo 'no mapping for' \"$1\" >&2\nexit 1");

        let policy = SubstitutionPolicy::from_config(Some(prog.to_str().unwrap()), None).unwrap();
        let err = policy.resolve("foo").await.unwrap_err();
        assert!(err.to_string().contains("no mapping for foo"));
    }

    #[tokio::test]
    async fn test_program_not_found() {
        let policy =
            SubstitutionPolicy::from_config(Some("/nonexistent/dockersource-mod"), None).unwrap();
        assert!(matches!(
            policy.resolve("foo").await,
            Err(WrapperError::DecisionProgram { .. })
        ));
    }
}
