//! One run's IPC context: key, doorbell, control and telemetry channels
//!
//! Every resource is owned by the [`Session`] value and released when it is
//! dropped, on success and failure paths alike. A half-built session (say
//! the fourth signal fails to allocate) drops what it already created.

use crate::channel::{Channel, ChannelKind};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::names::{ResourceNames, ResourceRole, SessionKey};
use crate::signal::Doorbell;
use std::sync::Arc;

/// Host side of a session
pub struct Session {
    names: ResourceNames,
    doorbell: Arc<Doorbell>,
    control: Channel,
    telemetry: Channel,
}

impl Session {
    /// Create a session under a freshly generated key
    pub fn create(config: &SessionConfig) -> Result<Self> {
        Self::create_with_key(&config.resource_prefix, SessionKey::generate())
    }

    pub fn create_with_key(prefix: &str, key: SessionKey) -> Result<Self> {
        let names = ResourceNames::new(prefix, key);
        let doorbell = Arc::new(Doorbell::create(&names.name(ResourceRole::Doorbell))?);
        let control = Channel::create(&names, ChannelKind::Control)?;
        let telemetry = Channel::create(&names, ChannelKind::Telemetry)?;

        tracing::debug!(key = %names.key(), "session resources created");

        Ok(Self {
            names,
            doorbell,
            control,
            telemetry,
        })
    }

    pub fn key(&self) -> &SessionKey {
        self.names.key()
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    pub fn doorbell(&self) -> &Arc<Doorbell> {
        &self.doorbell
    }

    pub fn control(&self) -> &Channel {
        &self.control
    }

    pub fn telemetry(&self) -> &Channel {
        &self.telemetry
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(key = %self.names.key(), "session resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedRegion;

    #[test]
    fn test_resources_exist_while_session_lives() {
        let session = Session::create(&SessionConfig::default()).unwrap();
        let names = session.names().all();
        for name in &names {
            assert!(SharedRegion::open(name).is_ok(), "missing {}", name);
        }

        drop(session);
        for name in &names {
            assert!(SharedRegion::open(name).is_err(), "leaked {}", name);
        }
    }

    #[test]
    fn test_duplicate_key_is_rejected_without_leaks() {
        let key = SessionKey::generate();
        let prefix = SessionConfig::default().resource_prefix;
        let first = Session::create_with_key(&prefix, key.clone()).unwrap();
        assert!(Session::create_with_key(&prefix, key).is_err());

        // The failed attempt must not have unlinked the live session's resources
        for name in first.names().all() {
            assert!(SharedRegion::open(&name).is_ok());
        }
    }

    #[test]
    fn test_telemetry_buffer_starts_zeroed() {
        let session = Session::create(&SessionConfig::default()).unwrap();
        let mut head = [0xFFu8; 4];
        session.telemetry().buffer().read_into(&mut head);
        assert_eq!(head, [0, 0, 0, 0]);
    }
}
