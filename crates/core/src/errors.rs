//! Error types and handling
//!
//! This module provides the domain-specific error taxonomy used throughout
//! the crate. Errors are grouped by the subsystem that raises them
//! (configuration, features, the container runtime, lifecycle state) and
//! composed into a single top-level [`PacknplayError`] so callers can match
//! broadly or drill into a specific group.

use thiserror::Error;

/// Convenience alias for results carrying [`PacknplayError`].
pub type Result<T> = std::result::Result<T, PacknplayError>;

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum PacknplayError {
    /// Configuration parsing/validation errors.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Feature fetch/resolve/option errors.
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Container runtime errors.
    #[error(transparent)]
    Docker(#[from] DockerError),

    /// Lifecycle state store errors.
    #[error(transparent)]
    State(#[from] StateError),

    /// A lifecycle hook exited non-zero.
    #[error("hook '{phase}' failed: {message}")]
    HookFailed { phase: String, message: String },

    /// Multiple concurrent hook tasks failed; `failures` preserves task names.
    #[error("parallel hook failures: {failures:?}")]
    ParallelFailures { failures: Vec<(String, String)> },

    /// A running container with the computed identity already exists and the
    /// caller did not opt into reconnecting.
    #[error("{0}")]
    ContainerAlreadyRunning(String),

    /// Generic I/O error not already attributed to a specific subsystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating `devcontainer.json`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse configuration: {message}")]
    Parsing { message: String },

    #[error("malformed configuration field '{field}': {reason}")]
    Malformed { field: String, reason: String },

    #[error("configuration validation error: {message}")]
    Validation { message: String },

    #[error("neither 'image', 'dockerFile', nor 'features' is configured")]
    UnconfiguredBase,

    #[error("unsupported configuration feature: {feature}")]
    NotImplemented { feature: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while fetching, resolving, or validating features.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("failed to fetch feature '{reference}': {cause}")]
    Fetch { reference: String, cause: String },

    #[error("failed to extract feature '{reference}': {cause}")]
    Extract { reference: String, cause: String },

    #[error("feature '{reference}' is missing install.sh after extraction: {reason}")]
    Integrity { reference: String, reason: String },

    #[error("invalid feature id '{id}': contains a forbidden character")]
    InvalidId { id: String },

    #[error("unresolvable feature dependencies: {remaining:?}")]
    UnresolvableDependencies { remaining: Vec<String> },

    #[error("option '{option}' failed validation: {message}")]
    OptionValidation { option: String, message: String },

    #[error("feature metadata not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse feature metadata: {message}")]
    Parsing { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while interacting with the container runtime.
#[derive(Error, Debug)]
pub enum DockerError {
    #[error("image pull failed: {output}")]
    ImagePull { output: String },

    #[error("image build failed: {output}")]
    ImageBuild { output: String },

    #[error("container runtime unavailable: {message}")]
    RuntimeUnavailable { message: String },

    #[error("runtime command failed: {message}")]
    CommandFailed { message: String },

    #[error("{kind}: {details}")]
    BadPortSpec { kind: String, details: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the lifecycle state store.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("corrupt lifecycle state file at {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
