//! dockersource runtime - docker CLI interception engine.
//!
//! Classifies docker command lines, pulls the Dockerfile out of the build
//! context, discovers its base images and rewrites the build so each one
//! can be swapped through `--build-context`.

#![allow(clippy::result_large_err)]

pub mod args;
pub mod context;
pub mod exec;
pub mod extract;
pub mod frontend;
pub mod generate;
pub mod oci;
pub mod orchestrator;
pub mod path;
pub mod policy;
pub mod resolver;
pub mod source;

// Re-export common types
pub use args::{classify, InvocationState, DEFAULT_DOCKERFILE};
pub use context::{read_description, BuildContext};
pub use exec::execute;
pub use extract::extract_description;
pub use frontend::{BuildTarget, DockerfileFrontend, Frontend};
pub use generate::{generate, meta_resolver};
pub use oci::{CredentialStore, ImageReference, RegistryAuth, RegistryResolver};
pub use orchestrator::{
    CapabilityProbe, ExecutionPlan, HelpProbe, MetadataCopy, Orchestrator, DOCKER_BIN,
};
pub use path::{PathResolver, SelfLocation};
pub use policy::{SubstitutionPolicy, SubstitutionRule};
pub use resolver::{ImageMeta, ImageMetaResolver, RecordingResolver};
pub use source::{ReferenceRecord, SourceType, SubstitutionResult};

/// dockersource runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
