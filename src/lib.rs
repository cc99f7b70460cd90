//! VenomProbe - shared memory session manager for instrumented processes
//!
//! A host process launches a target carrying an in-process agent and talks
//! to it over two shared memory channels, no sockets involved:
//!
//! - **Control**: synchronous request/response; replies larger than one
//!   buffer are streamed in chunks
//! - **Telemetry**: fixed-size blocks pushed by the agent, drained on a
//!   background thread into a persistence sink
//!
//! # Lifecycle
//!
//! 1. [`SessionManager::establish_session`] creates the session's shared
//!    resources under a fresh key and runs the launch callback on its own thread
//! 2. The callback applies the [`EnvironmentInjector`] to the target's
//!    environment; the host waits (bounded) for that
//! 3. The dispatch loop serves both channels until the target exits
//! 4. Any in-flight telemetry block is flushed, the drain finishes, and the
//!    resources are released
//!
//! The target side lives in [`AgentSession`] (and the C ABI in [`bindings`]).

pub mod agent;
pub mod bindings;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod drain;
pub mod error;
pub mod futex;
pub mod handler;
pub mod host;
pub mod launch;
pub mod message;
pub mod names;
pub mod queue;
pub mod session;
pub mod shm;
pub mod signal;

pub use agent::AgentSession;
pub use channel::{Channel, ChannelKind, CHANNEL_CAPACITY};
pub use config::SessionConfig;
pub use dispatch::{DispatchStats, Exchange};
pub use error::{ProbeError, Result};
pub use handler::{MemoryPersistence, MessageHandler, Persistence};
pub use host::{SessionManager, SessionReport};
pub use launch::EnvironmentInjector;
pub use message::Message;
pub use names::{ResourceNames, ResourceRole, SessionKey};
pub use queue::{PendingQueue, TelemetryBlock};
pub use session::Session;

/// Install a `RUST_LOG`-driven fmt subscriber; later calls are no-ops
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_names(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
