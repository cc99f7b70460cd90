//! Error types for VenomProbe

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for VenomProbe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors that can occur while running a probe session
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Shared memory with this name already exists
    #[error("Shared memory '{name}' already exists")]
    AlreadyExists { name: String },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Opened region is smaller than the layout needs
    #[error("Shared memory '{name}' too small: need {need} bytes, got {got}")]
    RegionTooSmall { name: String, need: usize, got: usize },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Buffer overflow
    #[error("Buffer overflow: max {max} bytes, got {got} bytes")]
    BufferOverflow { max: usize, got: usize },

    /// Futex wait or wake failed
    #[error("Futex operation failed: {0}")]
    Futex(#[source] io::Error),

    /// Target never applied the session environment
    #[error("Target did not read the session environment within {0:?}")]
    HandshakeTimeout(Duration),

    /// Launch callback returned without applying the session environment
    #[error("Launch finished before the session environment was injected")]
    LaunchEndedBeforeInjection,

    /// Target exited while the host was waiting on it
    #[error("Target process exited during an exchange")]
    TargetExited,

    /// Host did not acknowledge a request in time
    #[error("No response from host on the {channel} channel")]
    ResponseTimeout { channel: String },

    /// An earlier response timed out; the host may still answer it late
    #[error("The {channel} channel is out of step with the host after a timeout")]
    ChannelDesynchronized { channel: String },

    /// Session key is not usable in resource names
    #[error("Invalid session key '{0}'")]
    InvalidKey(String),

    /// Expected environment variable is missing
    #[error("Environment variable '{0}' is not set")]
    MissingEnvironment(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message handler reported a failure
    #[error("Message handler failed: {0}")]
    Handler(String),

    /// Failed to start a session thread
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}
