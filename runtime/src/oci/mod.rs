//! OCI registry support: reference normalization, docker client
//! credentials, and the registry-backed metadata resolver.

pub mod credentials;
pub mod reference;
pub mod registry;

pub use credentials::CredentialStore;
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryResolver};
