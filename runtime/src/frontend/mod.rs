//! Build description frontend.
//!
//! The frontend turns raw Dockerfile bytes into build targets and, for a
//! chosen target, walks every stage it depends on, reporting each base
//! image to an [`ImageMetaResolver`]. Only what reference discovery needs
//! is understood; everything else in the file is skipped.

pub mod dockerfile;
mod outline;

use std::collections::HashMap;

use async_trait::async_trait;
use dockersource_core::error::Result;

use crate::resolver::ImageMetaResolver;

pub use dockerfile::{Dockerfile, Instruction, Stage};
pub use outline::DockerfileFrontend;

/// One build stage as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Stage name; empty for unnamed stages
    pub name: String,
    /// Base image as written, before argument expansion
    pub base: String,
}

#[async_trait]
pub trait Frontend: Send + Sync {
    /// Stages in declaration order.
    fn list_targets(&self, description: &[u8]) -> Result<Vec<BuildTarget>>;

    /// Evaluate `target` (empty means the last stage), reporting every
    /// base image it needs to `resolver`.
    async fn evaluate(
        &self,
        description: &[u8],
        target: &str,
        build_args: &HashMap<String, String>,
        resolver: &dyn ImageMetaResolver,
    ) -> Result<()>;
}
