use thiserror::Error;

/// dockersource error types
#[derive(Error, Debug)]
pub enum WrapperError {
    /// Two mutually exclusive settings were both supplied
    #[error("conflicting options: {0}")]
    ConfigConflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or decoding the build description failed
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The archive ended before the requested member was seen
    #[error("member {member} not found in archive")]
    MemberNotFound { member: String },

    /// External decompressor exited unsuccessfully
    #[error("{program} failed: {message}")]
    DecompressorFailed { program: String, message: String },

    /// A second positional build context was found.
    ///
    /// This never comes from user input: it means the argument classifier
    /// mis-assigned a flag value.
    #[error("found multiple contexts ({first:?}, {second:?}) -- this is a bug in the argument parser")]
    MultipleContexts { first: String, second: String },

    /// Build mode without any context argument
    #[error("could not find context for build in command line arguments")]
    MissingContext,

    /// Remote contexts are not supported
    #[error("unsupported context scheme: {0}")]
    UnsupportedContextScheme(String),

    /// Build description could not be located
    #[error("unable to locate {name} in context {context}")]
    DescriptionNotFound { name: String, context: String },

    /// Decision program exited unsuccessfully
    #[error("mod program failed for {reference}: {message}")]
    DecisionProgram { reference: String, message: String },

    /// Real executable could not be found on the search path
    #[error("executable file not found in $PATH: {0}")]
    ExecutableNotFound(String),

    /// Build description could not be evaluated
    #[error("Frontend error: {0}")]
    FrontendError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Running the real executable failed
    #[error("error executing actual docker bin: {0}")]
    ExecFailed(String),

    /// Interrupted by a signal
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl WrapperError {
    /// True for invariant violations inside this crate rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, WrapperError::MultipleContexts { .. })
    }
}

impl From<serde_json::Error> for WrapperError {
    fn from(err: serde_json::Error) -> Self {
        WrapperError::SerializationError(err.to_string())
    }
}

/// Result type alias for dockersource operations
pub type Result<T> = std::result::Result<T, WrapperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_conflict_display() {
        let error = WrapperError::ConfigConflict(
            "BUILDKIT_METADATA_DIR and BUILDKIT_METADATA_FILE are mutually exclusive".to_string(),
        );
        assert_eq!(
            error.to_string(),
            "conflicting options: BUILDKIT_METADATA_DIR and BUILDKIT_METADATA_FILE are mutually exclusive"
        );
    }

    #[test]
    fn test_unsupported_scheme_names_scheme() {
        let error = WrapperError::UnsupportedContextScheme("git".to_string());
        assert_eq!(error.to_string(), "unsupported context scheme: git");
    }

    #[test]
    fn test_description_not_found_display() {
        let error = WrapperError::DescriptionNotFound {
            name: "Dockerfile".to_string(),
            context: "./missing".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "unable to locate Dockerfile in context ./missing"
        );
    }

    #[test]
    fn test_decompressor_failed_carries_diagnostic() {
        let error = WrapperError::DecompressorFailed {
            program: "xz".to_string(),
            message: "xz: (stdin): File format not recognized".to_string(),
        };
        assert!(error.to_string().contains("File format not recognized"));
        assert!(error.to_string().contains("xz"));
    }

    #[test]
    fn test_multiple_contexts_is_internal() {
        let error = WrapperError::MultipleContexts {
            first: ".".to_string(),
            second: "other".to_string(),
        };
        assert!(error.is_internal());
        assert!(error.to_string().contains("bug in the argument parser"));
    }

    #[test]
    fn test_user_errors_are_not_internal() {
        assert!(!WrapperError::MissingContext.is_internal());
        assert!(!WrapperError::ExecutableNotFound("docker".to_string()).is_internal());
        assert!(!WrapperError::ConfigConflict("x".to_string()).is_internal());
    }

    #[test]
    fn test_registry_error_display() {
        let error = WrapperError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: WrapperError = io_error.into();
        assert!(matches!(error, WrapperError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ invalid");
        let error: WrapperError = result.unwrap_err().into();
        assert!(matches!(error, WrapperError::SerializationError(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_err() -> Result<i32> {
            Err(WrapperError::Other("test error".to_string()))
        }

        assert!(returns_err().is_err());
    }
}
