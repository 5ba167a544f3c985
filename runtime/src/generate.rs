//! Substitution result generation.
//!
//! Evaluates every build target of a description through the frontend,
//! then asks the substitution policy about each discovered reference.

use std::collections::HashMap;
use std::path::Path;

use dockersource_core::error::Result;

use crate::frontend::Frontend;
use crate::oci::{CredentialStore, RegistryResolver};
use crate::policy::SubstitutionPolicy;
use crate::resolver::{ImageMetaResolver, RecordingResolver};
use crate::source::{ReferenceRecord, SubstitutionResult};

/// Pick the metadata resolver variant.
///
/// The registry variant reads credentials from `docker_config`.
pub fn meta_resolver(
    resolve_remote: bool,
    docker_config: Option<&Path>,
) -> Box<dyn ImageMetaResolver> {
    if resolve_remote {
        Box::new(RegistryResolver::new(CredentialStore::in_config_dir(
            docker_config,
        )))
    } else {
        Box::new(RecordingResolver::new())
    }
}

/// Discover the base images of `description` and decide their replacements.
pub async fn generate(
    frontend: &dyn Frontend,
    resolver: &dyn ImageMetaResolver,
    policy: &SubstitutionPolicy,
    description: &[u8],
    build_args: &HashMap<String, String>,
) -> Result<SubstitutionResult> {
    let targets = frontend.list_targets(description)?;
    let mut names: Vec<&str> = Vec::with_capacity(targets.len());
    for target in &targets {
        if !names.contains(&target.name.as_str()) {
            names.push(&target.name);
        }
    }
    tracing::debug!(targets = ?names, "Evaluating build targets");

    futures::future::try_join_all(
        names
            .iter()
            .map(|name| frontend.evaluate(description, name, build_args, resolver)),
    )
    .await?;

    let mut sources = Vec::new();
    for reference in resolver.references() {
        let replace = policy.resolve(&reference).await?;
        tracing::debug!(reference = %reference, replace = %replace, "Resolved reference");
        sources.push(ReferenceRecord::image(reference, replace));
    }

    Ok(SubstitutionResult::new(sources))
}
