//! Session manager
//!
//! Owns the map of live bidirectional channels keyed by device id.
//! Each session carries a bounded outbound queue drained by a single
//! pump task; the map lock is only held for insert/remove/lookup,
//! never across channel I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use robohub_core::ServerFrame;

/// Identifiers that belong to dashboards and internal tooling. A
/// browser client sharing the device endpoint must not take these
/// over, so they are refused before a session is installed.
pub const RESERVED_DEVICE_IDS: &[&str] =
    &["dashboard", "browser", "servo", "wheel", "audio", "operator"];

/// Per-frame send outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NoSuchDevice,
    QueueFull,
    SendFailed,
}

#[derive(Error, Debug)]
#[error("reserved device id: {0}")]
pub struct ReservedIdError(pub String);

/// A live channel bound to one device id.
pub struct Session {
    device_id: String,
    device_type: RwLock<Option<String>>,
    outbound: mpsc::Sender<ServerFrame>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The type claimed by the session's registration frame, if any.
    pub fn device_type(&self) -> Option<String> {
        self.device_type.read().clone()
    }

    /// Record the claimed type from the first registration frame.
    pub fn set_device_type(&self, device_type: &str) {
        *self.device_type.write() = Some(device_type.to_string());
    }

    /// Enqueue one frame for the outbound pump. On overflow the newest
    /// frame is dropped and the session stays alive.
    pub fn enqueue(&self, frame: ServerFrame) -> SendOutcome {
        match self.outbound.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(device_id = %self.device_id, "outbound queue full, frame dropped");
                SendOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::SendFailed,
        }
    }

    /// Signal both session tasks to stop.
    fn close(&self, reason: &str) {
        tracing::info!(device_id = %self.device_id, reason, "closing session");
        let _ = self.closed.send(true);
    }
}

/// Handles returned by [`SessionManager::accept`]; the caller wires
/// them into the inbound dispatcher and outbound pump tasks.
pub struct AcceptedSession {
    pub session: Arc<Session>,
    /// Drained by the outbound pump; exactly one writer per channel.
    pub outbound_rx: mpsc::Receiver<ServerFrame>,
    /// Flips to `true` when the session is closed server-side.
    pub closed_rx: watch::Receiver<bool>,
    /// Whether a prior session for the same id was displaced.
    pub replaced: bool,
}

/// Map of live sessions, at most one per device id.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    queue_capacity: usize,
}

impl SessionManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Install a session for `device_id`, closing any prior session
    /// for the same id first.
    pub fn accept(&self, device_id: &str) -> Result<AcceptedSession, ReservedIdError> {
        if RESERVED_DEVICE_IDS.contains(&device_id) {
            return Err(ReservedIdError(device_id.to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let (closed_tx, closed_rx) = watch::channel(false);
        let session = Arc::new(Session {
            device_id: device_id.to_string(),
            device_type: RwLock::new(None),
            outbound: outbound_tx,
            closed: closed_tx,
        });

        let prior = {
            let mut sessions = self.sessions.lock();
            sessions.insert(device_id.to_string(), Arc::clone(&session))
        };
        let replaced = prior.is_some();
        if let Some(prior) = prior {
            prior.close("reregistered");
        }

        Ok(AcceptedSession {
            session,
            outbound_rx,
            closed_rx,
            replaced,
        })
    }

    /// Enqueue one frame to the named device.
    pub fn send(&self, device_id: &str, frame: ServerFrame) -> SendOutcome {
        let session = {
            let sessions = self.sessions.lock();
            sessions.get(device_id).cloned()
        };
        match session {
            Some(session) => session.enqueue(frame),
            None => SendOutcome::NoSuchDevice,
        }
    }

    /// Fan out one frame to every session claiming `device_type`.
    pub fn send_to_type(
        &self,
        device_type: &str,
        frame: &ServerFrame,
    ) -> Vec<(String, SendOutcome)> {
        let targets = self.sessions_of_type(device_type);
        targets
            .into_iter()
            .map(|session| {
                let outcome = session.enqueue(frame.clone());
                (session.device_id().to_string(), outcome)
            })
            .collect()
    }

    /// Sessions whose registration claimed `device_type`.
    pub fn sessions_of_type(&self, device_type: &str) -> Vec<Arc<Session>> {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .filter(|s| s.device_type().as_deref() == Some(device_type))
            .cloned()
            .collect()
    }

    /// Force-close a session and remove it from the map. Registry
    /// changes are driven by the caller, not here.
    pub fn close(&self, device_id: &str, reason: &str) -> bool {
        let session = {
            let mut sessions = self.sessions.lock();
            sessions.remove(device_id)
        };
        match session {
            Some(session) => {
                session.close(reason);
                true
            }
            None => false,
        }
    }

    /// Session-ended hook: removes `session` only if it is still the
    /// installed one. A displaced session (re-registration) or one
    /// already closed by the reaper returns `false`, so the ended task
    /// must not drive any offline transition.
    pub fn finish_if_current(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(session.device_id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.device_id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(device_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robohub_core::PayloadMap;

    fn command_frame(name: &str) -> ServerFrame {
        ServerFrame::Command {
            command_id: "c1".into(),
            command_name: name.into(),
            payload: PayloadMap::new(),
        }
    }

    #[tokio::test]
    async fn test_accept_rejects_reserved_ids() {
        let manager = SessionManager::new(4);
        for id in RESERVED_DEVICE_IDS {
            assert!(manager.accept(id).is_err());
        }
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let manager = SessionManager::new(4);
        let mut accepted = manager.accept("wheelcontroller").unwrap();

        assert_eq!(
            manager.send("wheelcontroller", command_frame("forward")),
            SendOutcome::Sent
        );
        let frame = accepted.outbound_rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Command { command_name, .. } if command_name == "forward"));
    }

    #[tokio::test]
    async fn test_send_to_unknown_device() {
        let manager = SessionManager::new(4);
        assert_eq!(
            manager.send("ghost", command_frame("forward")),
            SendOutcome::NoSuchDevice
        );
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_newest() {
        let manager = SessionManager::new(2);
        let mut accepted = manager.accept("wheelcontroller").unwrap();

        assert_eq!(manager.send("wheelcontroller", command_frame("a")), SendOutcome::Sent);
        assert_eq!(manager.send("wheelcontroller", command_frame("b")), SendOutcome::Sent);
        assert_eq!(
            manager.send("wheelcontroller", command_frame("c")),
            SendOutcome::QueueFull
        );

        // The queued frames survive in FIFO order; the overflow frame is gone.
        let first = accepted.outbound_rx.recv().await.unwrap();
        assert!(matches!(first, ServerFrame::Command { command_name, .. } if command_name == "a"));
        let second = accepted.outbound_rx.recv().await.unwrap();
        assert!(matches!(second, ServerFrame::Command { command_name, .. } if command_name == "b"));

        // Session is still live after overflow.
        assert!(manager.get("wheelcontroller").is_some());
    }

    #[tokio::test]
    async fn test_reaccept_closes_prior_session() {
        let manager = SessionManager::new(4);
        let first = manager.accept("d").unwrap();
        let second = manager.accept("d").unwrap();

        assert!(second.replaced);
        assert!(*first.closed_rx.borrow());
        assert!(!*second.closed_rx.borrow());
        assert_eq!(manager.count(), 1);
        assert!(Arc::ptr_eq(&manager.get("d").unwrap(), &second.session));
    }

    #[tokio::test]
    async fn test_finish_if_current_ignores_displaced_session() {
        let manager = SessionManager::new(4);
        let first = manager.accept("d").unwrap();
        let second = manager.accept("d").unwrap();

        assert!(!manager.finish_if_current(&first.session));
        assert_eq!(manager.count(), 1);
        assert!(manager.finish_if_current(&second.session));
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_type_filters_by_claim() {
        let manager = SessionManager::new(4);
        let wheel = manager.accept("wheelcontroller").unwrap();
        let servo = manager.accept("servoscontroller").unwrap();
        wheel.session.set_device_type("wheel");
        servo.session.set_device_type("servo");

        let outcomes = manager.send_to_type("wheel", &command_frame("forward"));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "wheelcontroller");
        assert_eq!(outcomes[0].1, SendOutcome::Sent);

        // Unregistered sessions are not fan-out targets.
        let unregistered = manager.accept("mystery").unwrap();
        assert!(unregistered.session.device_type().is_none());
        assert_eq!(manager.send_to_type("wheel", &command_frame("x")).len(), 1);
    }
}
