//! Automatic reconnection around a [`ControlSession`].
//!
//! The supervisor watches the session state. When a connection drops (or an
//! attempt fails) and the user did not ask for the disconnect, it schedules a
//! new attempt with the last profile after a fixed delay. A manual disconnect
//! suppresses this until the next explicit `connect`.

use crate::control::ControlSession;
use crate::model::{ConnectionState, ObsProfile};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectStatus {
    #[default]
    Idle,
    Scheduled { attempt: u32, at: Instant },
}

impl ReconnectStatus {
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Idle => None,
            Self::Scheduled { at, .. } => Some(at.saturating_duration_since(Instant::now())),
        }
    }
}

#[derive(Default)]
struct Policy {
    last_profile: Option<ObsProfile>,
    manual_disconnect: bool,
    pending: Option<JoinHandle<()>>,
    attempt: u32,
}

impl Policy {
    fn cancel_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

struct Shared {
    session: ControlSession,
    delay: Duration,
    enabled: bool,
    policy: Mutex<Policy>,
    status: watch::Sender<ReconnectStatus>,
}

pub struct ReconnectSupervisor {
    shared: Arc<Shared>,
    watcher: JoinHandle<()>,
}

impl ReconnectSupervisor {
    pub fn new(session: ControlSession, delay: Duration, enabled: bool) -> Self {
        let (status, _) = watch::channel(ReconnectStatus::Idle);
        let shared = Arc::new(Shared {
            session,
            delay,
            enabled,
            policy: Mutex::new(Policy::default()),
            status,
        });
        let watcher = tokio::spawn(watch_session(
            shared.session.subscribe(),
            Arc::downgrade(&shared),
        ));
        Self { shared, watcher }
    }

    pub fn session(&self) -> &ControlSession {
        &self.shared.session
    }

    /// Explicit connect: clears the manual-disconnect flag and remembers the
    /// profile for later reconnects.
    pub fn connect(&self, profile: ObsProfile) {
        {
            let mut policy = self.shared.policy();
            policy.cancel_pending();
            policy.manual_disconnect = false;
            policy.attempt = 0;
            policy.last_profile = Some(profile.clone());
        }
        self.shared.status.send_replace(ReconnectStatus::Idle);
        self.shared
            .session
            .connect(&profile.host, profile.port, &profile.password);
    }

    pub fn disconnect(&self) {
        {
            let mut policy = self.shared.policy();
            policy.manual_disconnect = true;
            policy.cancel_pending();
        }
        self.shared.status.send_replace(ReconnectStatus::Idle);
        self.shared.session.disconnect();
    }

    /// Aborts a scheduled attempt without touching the session.
    pub fn cancel(&self) {
        self.shared.policy().cancel_pending();
        self.shared.status.send_replace(ReconnectStatus::Idle);
    }

    pub fn status(&self) -> watch::Receiver<ReconnectStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.status.borrow().is_reconnecting()
    }

    pub fn last_profile(&self) -> Option<ObsProfile> {
        self.shared.policy().last_profile.clone()
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.watcher.abort();
        self.shared.policy().cancel_pending();
    }
}

impl Shared {
    fn policy(&self) -> MutexGuard<'_, Policy> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_connection(self: &Arc<Self>, connection: &ConnectionState) {
        match connection {
            ConnectionState::Connected => {
                let mut policy = self.policy();
                policy.cancel_pending();
                policy.attempt = 0;
                drop(policy);
                self.status.send_replace(ReconnectStatus::Idle);
            }
            down if down.is_down() => self.schedule(),
            _ => {}
        }
    }

    fn schedule(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        let mut policy = self.policy();
        if policy.manual_disconnect || policy.last_profile.is_none() {
            return;
        }
        policy.cancel_pending();
        policy.attempt += 1;
        let attempt = policy.attempt;
        let delay = self.delay;
        let weak = Arc::downgrade(self);
        policy.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire(attempt);
            }
        }));
        drop(policy);

        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.status.send_replace(ReconnectStatus::Scheduled {
            attempt,
            at: Instant::now() + delay,
        });
    }

    fn fire(&self, attempt: u32) {
        let profile = {
            let mut policy = self.policy();
            // Detach our own handle; aborting it here would cancel this task.
            policy.pending = None;
            if policy.manual_disconnect {
                return;
            }
            policy.last_profile.clone()
        };
        self.status.send_replace(ReconnectStatus::Idle);
        if let Some(profile) = profile {
            tracing::info!(attempt, host = %profile.host, port = profile.port, "reconnecting to obs");
            self.session
                .connect(&profile.host, profile.port, &profile.password);
        }
    }
}

/// Reacts once per distinct (generation, connection) pair.
async fn watch_session(mut rx: watch::Receiver<crate::model::ControlState>, shared: Weak<Shared>) {
    let mut last: Option<(u64, ConnectionState)> = None;
    loop {
        let current = {
            let state = rx.borrow_and_update();
            (state.generation, state.connection.clone())
        };
        if last.as_ref() != Some(&current) {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.on_connection(&current.1);
            last = Some(current);
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ScreenshotSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Accepts and immediately drops every connection.
    async fn dropping_listener() -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });
        (port, accepts)
    }

    async fn wait_for_accepts(accepts: &AtomicUsize, n: usize) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while accepts.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener did not see enough connection attempts");
    }

    fn profile(port: u16) -> ObsProfile {
        ObsProfile::new("local", "127.0.0.1", port, "")
    }

    #[tokio::test]
    async fn failed_attempts_are_retried_after_delay() {
        let (port, accepts) = dropping_listener().await;
        let supervisor = ReconnectSupervisor::new(
            ControlSession::new(ScreenshotSpec::default()),
            Duration::from_millis(50),
            true,
        );
        supervisor.connect(profile(port));
        wait_for_accepts(&accepts, 3).await;
        assert_eq!(supervisor.last_profile().map(|p| p.port), Some(port));
    }

    #[tokio::test]
    async fn manual_disconnect_suppresses_reconnect_until_next_connect() {
        let (port, accepts) = dropping_listener().await;
        let supervisor = ReconnectSupervisor::new(
            ControlSession::new(ScreenshotSpec::default()),
            Duration::from_millis(200),
            true,
        );
        supervisor.connect(profile(port));
        wait_for_accepts(&accepts, 1).await;
        supervisor.disconnect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_reconnecting());
        assert_eq!(
            supervisor.session().snapshot().connection,
            ConnectionState::Disconnected
        );

        supervisor.connect(profile(port));
        wait_for_accepts(&accepts, 2).await;
    }

    #[tokio::test]
    async fn failure_exposes_scheduled_status() {
        let (port, _accepts) = dropping_listener().await;
        let supervisor = ReconnectSupervisor::new(
            ControlSession::new(ScreenshotSpec::default()),
            Duration::from_secs(30),
            true,
        );
        let mut status = supervisor.status();
        supervisor.connect(profile(port));
        let scheduled = tokio::time::timeout(
            Duration::from_secs(3),
            status.wait_for(|s| s.is_reconnecting()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(matches!(scheduled, ReconnectStatus::Scheduled { attempt: 1, .. }));
        assert!(scheduled.remaining().unwrap() <= Duration::from_secs(30));

        supervisor.cancel();
        assert!(!supervisor.is_reconnecting());
    }

    #[tokio::test]
    async fn disabled_supervisor_never_retries() {
        let (port, accepts) = dropping_listener().await;
        let supervisor = ReconnectSupervisor::new(
            ControlSession::new(ScreenshotSpec::default()),
            Duration::from_millis(20),
            false,
        );
        supervisor.connect(profile(port));
        wait_for_accepts(&accepts, 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
    }
}
