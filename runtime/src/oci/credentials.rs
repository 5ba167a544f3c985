//! Registry credentials from the docker client configuration.
//!
//! Reads `$DOCKER_CONFIG/config.json` (default `~/.docker/config.json`):
//! inline `auths` entries first, then the configured credential helper.
//! A missing config file means anonymous access.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use base64::Engine;
use dockersource_core::error::{Result, WrapperError};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64 of "username:password"
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: String,
}

/// Read-only view of the docker client credential configuration.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// `config.json` inside `config_dir`, or `~/.docker/config.json`.
    pub fn in_config_dir(config_dir: Option<&Path>) -> Self {
        let dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::home_dir()
                .map(|h| h.join(".docker"))
                .unwrap_or_else(|| PathBuf::from(".docker")),
        };
        Self::new(dir.join("config.json"))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get credentials for a registry. Returns `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let config = self.load()?;
        let wanted = normalize_registry(registry);

        let entry = config
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);
        if let Some(entry) = entry {
            if let Some(creds) = decode_entry(entry, registry)? {
                tracing::debug!(registry, "Using credentials from docker config");
                return Ok(Some(creds));
            }
        }

        let helper = config
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, helper)| helper)
            .or(config.creds_store.as_ref());
        match helper {
            Some(helper) => run_helper(helper, registry),
            None => Ok(None),
        }
    }

    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            WrapperError::ConfigError(format!(
                "Failed to read docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            WrapperError::ConfigError(format!(
                "Failed to parse docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn decode_entry(entry: &AuthEntry, registry: &str) -> Result<Option<(String, String)>> {
    if let (Some(user), Some(pass)) = (&entry.username, &entry.password) {
        return Ok(Some((user.clone(), pass.clone())));
    }
    let encoded = match &entry.auth {
        Some(a) if !a.is_empty() => a,
        _ => return Ok(None),
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| WrapperError::RegistryError {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;
    let decoded = String::from_utf8(decoded).map_err(|e| WrapperError::RegistryError {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    Ok(decoded
        .split_once(':')
        .map(|(user, pass)| (user.to_string(), pass.to_string())))
}

/// Ask `docker-credential-<helper>` for credentials.
///
/// A helper that is missing or has nothing stored yields `None`.
fn run_helper(helper: &str, registry: &str) -> Result<Option<(String, String)>> {
    let program = format!("docker-credential-{}", helper);
    let server = if normalize_registry(registry) == "docker.io" {
        "https://index.docker.io/v1/"
    } else {
        registry
    };

    let mut child = match Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(program = %program, error = %e, "Credential helper unavailable");
            return Ok(None);
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        tracing::debug!(program = %program, registry, "No credentials from helper");
        return Ok(None);
    }

    let response: HelperResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
        WrapperError::RegistryError {
            registry: registry.to_string(),
            message: format!("Invalid response from {}: {}", program, e),
        }
    })?;
    Ok(Some((response.username, response.secret)))
}

/// Normalize registry keys: strip scheme and path, fold Docker Hub aliases.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or(r);
    match host {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => "docker.io".to_string(),
        other => other.to_string(),
    }
}
