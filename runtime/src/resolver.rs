//! Image metadata resolution during Dockerfile evaluation.
//!
//! The frontend asks a resolver for every base image it touches. That
//! callback is where references are discovered, so every resolver also
//! records what it was asked about.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dockersource_core::error::Result;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Image config returned for references that are only being recorded.
pub const EMPTY_CONFIG: &[u8] = b"{}";

/// Digest and raw config of a resolved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub digest: String,
    pub config: Vec<u8>,
}

/// Callback the frontend uses to learn about base images.
///
/// May be called concurrently while several targets are evaluated.
#[async_trait]
pub trait ImageMetaResolver: Send + Sync {
    /// Resolve `reference` to its digest and image config.
    async fn resolve_image_config(&self, reference: &str) -> Result<ImageMeta>;

    /// Every reference seen so far, sorted and de-duplicated.
    fn references(&self) -> Vec<String>;
}

/// Records references and answers with a fixed empty config.
///
/// No registry traffic: the references only need to be known, not fetched.
#[derive(Debug)]
pub struct RecordingResolver {
    refs: Mutex<BTreeSet<String>>,
    empty: ImageMeta,
}

impl RecordingResolver {
    pub fn new() -> Self {
        Self {
            refs: Mutex::new(BTreeSet::new()),
            empty: ImageMeta {
                digest: format!("sha256:{}", hex::encode(Sha256::digest(EMPTY_CONFIG))),
                config: EMPTY_CONFIG.to_vec(),
            },
        }
    }
}

impl Default for RecordingResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageMetaResolver for RecordingResolver {
    async fn resolve_image_config(&self, reference: &str) -> Result<ImageMeta> {
        if self.refs.lock().insert(reference.to_string()) {
            tracing::debug!(reference, "Recorded base image");
        }
        Ok(self.empty.clone())
    }

    fn references(&self) -> Vec<String> {
        self.refs.lock().iter().cloned().collect()
    }
}
