use thiserror::Error;

/// rpm-lockfile error types
#[derive(Error, Debug)]
pub enum LockError {
    /// Image reference could not be split into repository/tag/digest
    #[error("Malformed image reference: {0}")]
    MalformedImageReference(String),

    /// Containerfile references a build argument with no value
    #[error("Undefined build argument: {0}")]
    UndefinedBuildArgument(String),

    /// Containerfile has no FROM line
    #[error("No base image found in {0}")]
    NoBaseImageFound(String),

    /// Stage filters were given but none matched
    #[error("No stage matched {filter} in {file}")]
    NoStageMatched { file: String, filter: String },

    /// Repo declaration without baseurl/metalink/mirrorlist
    #[error("Repo {0} must specify one of baseurl/metalink/mirrorlist")]
    MissingUrlSource(String),

    /// Content origin type that is not registered
    #[error("Unknown content origin: {0}")]
    UnknownContentOrigin(String),

    /// Required environment configuration is absent
    #[error("Env var '{0}' is not defined.")]
    MissingConfiguration(String),

    /// Compose metadata that can not be turned into repositories
    #[error("Unexpected compose metadata: {0}")]
    InconsistentComposeMetadata(String),

    /// Input file violates the schema or semantic constraints
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Image inspect/copy or layer handling failed
    #[error("Image error: {0}")]
    ImageError(String),

    /// HTTP fetch failed
    #[error("HTTP error: {url} - {message}")]
    HttpError { url: String, message: String },

    /// Git fetch failed (the repository URL is never included)
    #[error("Git error: {0}")]
    GitError(String),

    /// External dependency resolver failed
    #[error("Resolver error for {arch}: {message}")]
    ResolverError { arch: String, message: String },

    /// rpmdb cache operation failed
    #[error("Cache error: {0}")]
    CacheError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// One or more architecture runs failed
    #[error("{}", format_arch_failures(.0))]
    ArchitecturesFailed(Vec<(String, LockError)>),
}

fn format_arch_failures(failures: &[(String, LockError)]) -> String {
    let parts: Vec<String> = failures
        .iter()
        .map(|(arch, err)| format!("[{}] {}", arch, err))
        .collect();
    format!("Resolution failed for {} architecture(s): {}", failures.len(), parts.join("; "))
}

impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        LockError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for LockError {
    fn from(err: serde_yaml::Error) -> Self {
        LockError::SerializationError(err.to_string())
    }
}

/// Result type alias for rpm-lockfile operations
pub type Result<T> = std::result::Result<T, LockError>;
