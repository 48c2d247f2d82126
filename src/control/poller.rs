use super::ControlSession;
use crate::model::ScreenshotTarget;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically refreshes the program (and, in studio mode, preview)
/// screenshots while the session is connected.
pub struct ScreenshotPoller {
    session: ControlSession,
    interval: Duration,
    paused: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenshotPoller {
    pub fn new(session: ControlSession, interval: Duration) -> Self {
        Self {
            session,
            interval,
            paused: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let session = self.session.clone();
        let paused = self.paused.clone();
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; wait a full period like every other tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                poll_once(&session);
            }
        }));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "screenshot polling started");
    }

    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::debug!("screenshot polling stopped");
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ScreenshotPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_once(session: &ControlSession) {
    let (program, preview) = {
        let state = session.inner.state.borrow();
        if !state.connection.is_connected() {
            return;
        }
        let preview = (state.studio_mode_enabled
            && !state.preview_scene.is_empty()
            && state.preview_scene != state.current_scene)
            .then(|| state.preview_scene.clone());
        (state.current_scene.clone(), preview)
    };

    if !program.is_empty() {
        session.fetch_screenshot(&program, ScreenshotTarget::Program);
    }
    if let Some(preview) = preview {
        session.fetch_screenshot(&preview, ScreenshotTarget::Preview);
    }
}
