//! Host side of a probe run: establish the session, launch, dispatch, shut down

use crate::config::SessionConfig;
use crate::dispatch::{flush_in_flight, DispatchStats, Dispatcher};
use crate::drain::TelemetryPipeline;
use crate::error::{ProbeError, Result};
use crate::handler::{MessageHandler, Persistence};
use crate::launch::{spawn_launch, EnvironmentInjector, Handshake, HandshakeOutcome, TargetExit};
use crate::names::SessionKey;
use crate::session::Session;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub key: SessionKey,
    pub stats: DispatchStats,
    /// A telemetry block raced with the target's exit and was picked up late
    pub flushed_in_flight: bool,
}

/// Runs probe sessions against a message handler and a persistence sink
pub struct SessionManager<H, P> {
    config: SessionConfig,
    handler: Arc<Mutex<H>>,
    persistence: Option<P>,
}

impl<H: MessageHandler, P: Persistence> SessionManager<H, P> {
    pub fn new(config: SessionConfig, handler: H, persistence: P) -> Self {
        Self {
            config,
            handler: Arc::new(Mutex::new(handler)),
            persistence: Some(persistence),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handler(&self) -> MutexGuard<'_, H> {
        self.handler.lock()
    }

    /// The sink; `None` only if a previous drain panicked while holding it
    pub fn persistence(&self) -> Option<&P> {
        self.persistence.as_ref()
    }

    /// Run one target process under a fresh session
    ///
    /// `launch` runs on its own thread. It must apply the injector to the
    /// target's environment before spawning it and return once the target
    /// has exited. This call returns after the dispatch loop has stopped and
    /// every telemetry block has been persisted.
    pub fn establish_session<F>(&mut self, launch: F) -> Result<SessionReport>
    where
        F: FnOnce(EnvironmentInjector) + Send + 'static,
    {
        self.config.validate()?;
        let timeout = self.config.handshake_timeout();

        let session = Session::create(&self.config)?;
        let key = session.key().clone();
        let span = tracing::info_span!("session", %key);
        let _enter = span.enter();

        let handshake = Handshake::new();
        let exit = TargetExit::new(session.doorbell());
        let injector = EnvironmentInjector::new(&self.config, &key, Arc::clone(&handshake));
        spawn_launch(launch, injector, Arc::clone(&exit))?;
        tracing::info!("target launch dispatched");

        match handshake.wait(timeout) {
            HandshakeOutcome::Injected => tracing::info!("target picked up session environment"),
            HandshakeOutcome::LaunchEnded => {
                tracing::warn!("launch returned without injecting the session environment");
                return Err(ProbeError::LaunchEndedBeforeInjection);
            }
            HandshakeOutcome::TimedOut => {
                tracing::warn!(?timeout, "handshake timed out; tearing session down");
                return Err(ProbeError::HandshakeTimeout(timeout));
            }
        }

        let persistence = self.persistence.take().ok_or_else(|| {
            ProbeError::Config("persistence sink lost by an earlier session".to_string())
        })?;
        let mut pipeline = TelemetryPipeline::start(persistence, {
            let handler = Arc::clone(&self.handler);
            move || handler.lock().complete()
        })?;

        let run = Dispatcher::new(&session, &exit, &self.handler, pipeline.queue()).run();
        if let Err(e) = &run {
            tracing::error!(error = %e, "dispatch loop failed");
        }

        let flushed_in_flight = match flush_in_flight(&session, pipeline.queue()) {
            Ok(flushed) => flushed,
            Err(e) => {
                tracing::warn!(error = %e, "final telemetry flush failed");
                false
            }
        };
        let shutdown = pipeline.shutdown();
        self.persistence = pipeline.take_persistence();
        drop(session);

        let stats = run?;
        shutdown?;
        tracing::info!(
            messages = stats.control_messages,
            blocks = stats.telemetry_blocks,
            "session finished"
        );

        Ok(SessionReport {
            key,
            stats,
            flushed_in_flight,
        })
    }
}
