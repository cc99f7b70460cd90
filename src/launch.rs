//! Target launch and environment handshake
//!
//! The caller's launch callback runs on its own thread. It receives an
//! [`EnvironmentInjector`] and is expected to apply it to the target's
//! environment before spawning, then return once the target has exited.
//! Applying the injector is the "environment read" confirmation the host
//! waits for; the callback returning is the target-exit event.

use crate::config::SessionConfig;
use crate::error::{ProbeError, Result};
use crate::names::SessionKey;
use crate::signal::Doorbell;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct HandshakeFlags {
    injected: bool,
    launch_finished: bool,
    abandoned: bool,
}

/// How the wait for the environment handshake ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Injected,
    LaunchEnded,
    TimedOut,
}

/// Rendezvous between the launch thread and the coordinator
#[derive(Debug, Default)]
pub struct Handshake {
    flags: Mutex<HandshakeFlags>,
    changed: Condvar,
}

impl Handshake {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until the injector was applied, the launch ended, or `timeout`
    ///
    /// Any outcome other than `Injected` marks the handshake abandoned, so a
    /// late injector leaves the target's environment alone.
    pub fn wait(&self, timeout: Duration) -> HandshakeOutcome {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        let outcome = loop {
            if flags.injected {
                break HandshakeOutcome::Injected;
            }
            if flags.launch_finished {
                break HandshakeOutcome::LaunchEnded;
            }
            if self.changed.wait_until(&mut flags, deadline).timed_out() && !flags.injected {
                break if flags.launch_finished {
                    HandshakeOutcome::LaunchEnded
                } else {
                    HandshakeOutcome::TimedOut
                };
            }
        };
        if outcome != HandshakeOutcome::Injected {
            flags.abandoned = true;
        }
        outcome
    }

    fn launch_finished(&self) {
        let mut flags = self.flags.lock();
        flags.launch_finished = true;
        self.changed.notify_all();
    }
}

/// Hands the session identity to the target's environment
pub struct EnvironmentInjector {
    entries: Vec<(String, String)>,
    handshake: Arc<Handshake>,
}

impl EnvironmentInjector {
    pub fn new(config: &SessionConfig, key: &SessionKey, handshake: Arc<Handshake>) -> Self {
        Self {
            entries: vec![
                (config.key_env_var.clone(), key.to_string()),
                (config.activation_env_var.clone(), config.activation_id.clone()),
                (config.enable_env_var.clone(), config.enable_value.clone()),
            ],
            handshake,
        }
    }

    /// The variables this injector sets
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Add the session variables to `env`
    ///
    /// Returns `false`, leaving `env` untouched, if the host already gave up
    /// on the session.
    pub fn inject(&self, env: &mut HashMap<String, String>) -> bool {
        self.apply(|k, v| {
            env.insert(k.to_string(), v.to_string());
        })
    }

    /// Same as [`inject`](Self::inject), applied to a command about to spawn
    pub fn inject_command(&self, command: &mut Command) -> bool {
        self.apply(|k, v| {
            command.env(k, v);
        })
    }

    fn apply<F: FnMut(&str, &str)>(&self, mut set: F) -> bool {
        let mut flags = self.handshake.flags.lock();
        if flags.abandoned {
            tracing::warn!("session abandoned before injection; target runs without probe");
            return false;
        }
        for (k, v) in &self.entries {
            set(k, v);
        }
        flags.injected = true;
        self.handshake.changed.notify_all();
        true
    }
}

/// Host-local view of the target's lifetime
pub struct TargetExit {
    exited: AtomicBool,
    doorbell: Weak<Doorbell>,
}

impl TargetExit {
    pub fn new(doorbell: &Arc<Doorbell>) -> Arc<Self> {
        Arc::new(Self {
            exited: AtomicBool::new(false),
            doorbell: Arc::downgrade(doorbell),
        })
    }

    #[inline]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Record the exit and wake the dispatch loop
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
        if let Some(doorbell) = self.doorbell.upgrade() {
            if let Err(e) = doorbell.ring() {
                tracing::warn!(error = %e, "failed to ring doorbell on target exit");
            }
        }
    }
}

// Runs on every way out of the launch thread, unwinding included
struct LaunchGuard {
    handshake: Arc<Handshake>,
    exit: Arc<TargetExit>,
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("launch callback panicked");
        } else {
            tracing::debug!("launch callback returned");
        }
        self.handshake.launch_finished();
        self.exit.mark_exited();
    }
}

/// Run `launch` on its own thread
pub fn spawn_launch<F>(
    launch: F,
    injector: EnvironmentInjector,
    exit: Arc<TargetExit>,
) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce(EnvironmentInjector) + Send + 'static,
{
    let guard = LaunchGuard {
        handshake: Arc::clone(&injector.handshake),
        exit,
    };
    thread::Builder::new()
        .name("venom-probe-launch".to_string())
        .spawn(move || {
            let _guard = guard;
            launch(injector);
        })
        .map_err(|source| ProbeError::ThreadSpawn {
            name: "launch",
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector() -> (EnvironmentInjector, Arc<Handshake>) {
        let handshake = Handshake::new();
        let key = SessionKey::parse("ABC123").unwrap();
        (
            EnvironmentInjector::new(&SessionConfig::default(), &key, Arc::clone(&handshake)),
            handshake,
        )
    }

    #[test]
    fn test_inject_sets_three_entries() {
        let (inj, handshake) = injector();
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/bin".to_string());

        assert!(inj.inject(&mut env));
        assert_eq!(env.len(), 4);
        assert_eq!(env["VENOM_PROBE_KEY"], "ABC123");
        assert_eq!(env["VENOM_PROBE_ENABLE"], "1");
        assert_eq!(env["VENOM_PROBE_AGENT"], crate::config::DEFAULT_ACTIVATION_ID);
        assert_eq!(handshake.wait(Duration::from_millis(1)), HandshakeOutcome::Injected);
    }

    #[test]
    fn test_timeout_abandons_late_injection() {
        let (inj, handshake) = injector();
        let started = Instant::now();
        assert_eq!(handshake.wait(Duration::from_millis(30)), HandshakeOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));

        let mut env = HashMap::new();
        assert!(!inj.inject(&mut env));
        assert!(env.is_empty());
    }

    #[test]
    fn test_launch_without_injection_ends_wait_early() {
        let (inj, handshake) = injector();
        let bell = Arc::new(
            Doorbell::create(&format!("venom_probe_test_launch_{}", std::process::id())).unwrap(),
        );
        let exit = TargetExit::new(&bell);

        let handle = spawn_launch(|_inj| {}, inj, Arc::clone(&exit)).unwrap();
        let started = Instant::now();
        assert_eq!(handshake.wait(Duration::from_secs(5)), HandshakeOutcome::LaunchEnded);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert!(exit.has_exited());
    }

    #[test]
    fn test_inject_command_sets_env() {
        let (inj, _handshake) = injector();
        let mut cmd = Command::new("true");
        assert!(inj.inject_command(&mut cmd));
        let envs: HashMap<_, _> = cmd
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v?.to_str()?.to_string())))
            .collect();
        assert_eq!(envs["VENOM_PROBE_KEY"], "ABC123");
    }
}
