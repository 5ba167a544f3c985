//! Registry-backed image metadata resolver.
//!
//! Uses the `oci-distribution` crate to fetch the manifest and config of
//! each base image, for callers that need real image metadata while the
//! build description is evaluated.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dockersource_core::error::{Result, WrapperError};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::credentials::CredentialStore;
use super::reference::ImageReference;
use crate::resolver::{ImageMeta, ImageMetaResolver};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Look up credentials for `registry`, anonymous when there are none.
    pub fn from_credential_store(store: &CredentialStore, registry: &str) -> Result<Self> {
        Ok(match store.get(registry)? {
            Some((username, password)) => Self::basic(username, password),
            None => Self::anonymous(),
        })
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Resolves image configs against their registries.
///
/// Results are memoized under the canonical reference, so `foo` and
/// `docker.io/library/foo:latest` share one fetch. Concurrent misses for
/// the same image wait on the fetch already in flight.
pub struct RegistryResolver {
    client: Client,
    credentials: CredentialStore,
    refs: Mutex<BTreeSet<String>>,
    resolved: Mutex<HashMap<String, Arc<OnceCell<ImageMeta>>>>,
}

impl RegistryResolver {
    pub fn new(credentials: CredentialStore) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            credentials,
            refs: Mutex::new(BTreeSet::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fetch` once per canonical reference; later callers get its result.
    ///
    /// A failed fetch leaves the slot empty.
    async fn memoized<F, Fut>(&self, canonical: &str, fetch: F) -> Result<ImageMeta>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ImageMeta>>,
    {
        let cell = self
            .resolved
            .lock()
            .entry(canonical.to_string())
            .or_default()
            .clone();
        cell.get_or_try_init(fetch).await.cloned()
    }

    async fn fetch(&self, parsed: &ImageReference, canonical: &str) -> Result<ImageMeta> {
        let oci_ref: Reference = canonical.parse().map_err(|e| {
            WrapperError::FrontendError(format!("Invalid OCI reference '{}': {}", canonical, e))
        })?;
        let auth = RegistryAuth::from_credential_store(&self.credentials, &parsed.registry)?;

        tracing::debug!(reference = %canonical, "Fetching image config");
        let (_manifest, digest, config) = self
            .client
            .pull_manifest_and_config(&oci_ref, &auth.to_oci_auth())
            .await
            .map_err(|e| WrapperError::RegistryError {
                registry: parsed.registry.clone(),
                message: format!("Failed to pull manifest and config: {}", e),
            })?;

        Ok(ImageMeta {
            digest,
            config: config.into_bytes(),
        })
    }
}

#[async_trait]
impl ImageMetaResolver for RegistryResolver {
    async fn resolve_image_config(&self, reference: &str) -> Result<ImageMeta> {
        self.refs.lock().insert(reference.to_string());

        let parsed = ImageReference::parse(reference)?;
        let canonical = parsed.full_reference();
        self.memoized(&canonical, || self.fetch(&parsed, &canonical))
            .await
    }

    fn references(&self) -> Vec<String> {
        self.refs.lock().iter().cloned().collect()
    }
}

/// Select the linux image matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
