//! Target side of a session
//!
//! The in-process agent opens the resources the host created, using only the
//! session key it found in its environment. All calls block until the host
//! acknowledges them; one thread at a time per channel.

use crate::channel::{Channel, ChannelKind, CHANNEL_CAPACITY};
use crate::config::SessionConfig;
use crate::error::{ProbeError, Result};
use crate::message::Message;
use crate::names::{ResourceNames, ResourceRole, SessionKey};
use crate::signal::Doorbell;
use std::sync::Arc;
use std::time::Duration;

/// Agent handle onto a live session
pub struct AgentSession {
    names: ResourceNames,
    control: Channel,
    telemetry: Channel,
    response_timeout: Option<Duration>,
    // Channels whose last request timed out; the host may still answer late
    control_stale: bool,
    telemetry_stale: bool,
    scratch: Vec<u8>,
}

impl AgentSession {
    /// Open the session identified by `key`
    pub fn open(key: SessionKey, config: &SessionConfig) -> Result<Self> {
        let names = ResourceNames::new(config.resource_prefix.clone(), key);
        let doorbell = Arc::new(Doorbell::open(&names.name(ResourceRole::Doorbell))?);
        let control = Channel::open(&names, ChannelKind::Control, Arc::clone(&doorbell))?;
        let telemetry = Channel::open(&names, ChannelKind::Telemetry, doorbell)?;

        tracing::debug!(key = %names.key(), "agent attached to session");

        Ok(Self {
            names,
            control,
            telemetry,
            response_timeout: None,
            control_stale: false,
            telemetry_stale: false,
            scratch: vec![0u8; CHANNEL_CAPACITY],
        })
    }

    /// Open the session named by the environment the host injected
    pub fn from_env(config: &SessionConfig) -> Result<Self> {
        let enabled = std::env::var(&config.enable_env_var)
            .map_err(|_| ProbeError::MissingEnvironment(config.enable_env_var.clone()))?;
        if enabled != config.enable_value {
            return Err(ProbeError::Config(format!(
                "{} is '{}', probe not enabled",
                config.enable_env_var, enabled
            )));
        }
        let raw = std::env::var(&config.key_env_var)
            .map_err(|_| ProbeError::MissingEnvironment(config.key_env_var.clone()))?;
        Self::open(SessionKey::parse(&raw)?, config)
    }

    pub fn key(&self) -> &SessionKey {
        self.names.key()
    }

    /// Bound every wait for a host response; `None` waits forever
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    fn ensure_in_step(stale: bool, channel: &Channel) -> Result<()> {
        if stale {
            return Err(ProbeError::ChannelDesynchronized {
                channel: channel.kind().to_string(),
            });
        }
        Ok(())
    }

    /// Map a missed response to an error and mark the channel unusable
    fn await_response(stale: &mut bool, channel: &Channel, answered: bool) -> Result<()> {
        if answered {
            return Ok(());
        }
        *stale = true;
        tracing::warn!(channel = %channel.kind(), "host did not respond; channel disabled");
        Err(ProbeError::ResponseTimeout {
            channel: channel.kind().to_string(),
        })
    }

    /// Whether a timed-out request left the channel unusable
    pub fn is_desynchronized(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Control => self.control_stale,
            ChannelKind::Telemetry => self.telemetry_stale,
        }
    }

    /// Send a control message and copy the host's first reply chunk into `reply`
    ///
    /// Returns the number of bytes copied. The reply's real length is
    /// defined by the message kind, not by this layer.
    pub fn send_message(&mut self, kind: u32, body: &[u8], reply: &mut [u8]) -> Result<usize> {
        Self::ensure_in_step(self.control_stale, &self.control)?;
        let len = Message::new(kind, body).encode_into(&mut self.scratch)?;
        let answered = self
            .control
            .call(&self.scratch[..len], self.response_timeout)?;
        Self::await_response(&mut self.control_stale, &self.control, answered)?;
        Ok(self.control.buffer().read_into(reply))
    }

    /// Ask the host for the next chunk of a chunked reply
    pub fn next_chunk(&mut self, reply: &mut [u8]) -> Result<usize> {
        Self::ensure_in_step(self.control_stale, &self.control)?;
        let answered = self.control.request_response(self.response_timeout)?;
        Self::await_response(&mut self.control_stale, &self.control, answered)?;
        Ok(self.control.buffer().read_into(reply))
    }

    /// Publish one telemetry block; blocks until the host has copied it out
    pub fn send_telemetry(&mut self, block: &[u8]) -> Result<()> {
        Self::ensure_in_step(self.telemetry_stale, &self.telemetry)?;
        let answered = self.telemetry.call(block, self.response_timeout)?;
        Self::await_response(&mut self.telemetry_stale, &self.telemetry, answered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn test_timeout_disables_channel() {
        let config = SessionConfig::default();
        let session = Session::create(&config).unwrap();
        let mut agent = AgentSession::open(session.key().clone(), &config).unwrap();
        agent.set_response_timeout(Some(Duration::from_millis(20)));

        assert!(matches!(
            agent.send_telemetry(b"first"),
            Err(ProbeError::ResponseTimeout { .. })
        ));
        assert!(agent.is_desynchronized(ChannelKind::Telemetry));
        assert!(!agent.is_desynchronized(ChannelKind::Control));

        // Host answers late; the agent must not take that as the next reply
        let mut got = vec![0u8; 5];
        session.telemetry().accept(&mut got).unwrap();
        assert_eq!(&got, b"first");
        assert!(matches!(
            agent.send_telemetry(b"second"),
            Err(ProbeError::ChannelDesynchronized { .. })
        ));
        assert!(!session.telemetry().request().is_set());
        assert!(!session.telemetry().buffer().holds_data(CHANNEL_CAPACITY));
    }
}
