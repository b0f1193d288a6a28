use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use axum::extract::ws::Message;
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

use matinee_proto::ServerFrame;

/// Frames a single connection may have in flight before new ones are dropped.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Local membership and fan-out for every session with a viewer on this node.
///
/// Each connection owns a bounded outbound queue; broadcasts copy the member
/// list under the session lock and enqueue with `try_send` after releasing
/// it, so one slow socket never stalls its peers.
#[derive(Clone)]
pub struct SessionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    sessions: DashMap<String, Arc<SessionMembers>>,
    total_connections: AtomicI64,
}

struct SessionMembers {
    session_id: String,
    members: Mutex<Vec<Member>>,
}

struct Member {
    connection_id: Uuid,
    sender: mpsc::Sender<Message>,
}

/// Handed back from [`SessionHub::attach`].
pub struct Registration {
    /// Consumed by the connection's writer task.
    pub receiver: mpsc::Receiver<Message>,
    /// For replies addressed to this connection alone; shares the bounded
    /// queue with broadcasts.
    pub sender: mpsc::Sender<Message>,
    /// True when this connection is the first member of the session on this
    /// node, i.e. a bus subscription needs to exist.
    pub first_in_session: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl SessionHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: DashMap::new(),
                total_connections: AtomicI64::new(0),
            }),
        }
    }

    pub async fn attach(&self, session_id: &str, connection_id: Uuid) -> Registration {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let mut first_in_session = false;
        let state = match self.inner.sessions.entry(session_id.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let state = Arc::new(SessionMembers {
                    session_id: session_id.to_string(),
                    members: Mutex::new(Vec::new()),
                });
                entry.insert(Arc::clone(&state));
                first_in_session = true;
                state
            }
        };

        state.members.lock().await.push(Member {
            connection_id,
            sender: tx.clone(),
        });
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);

        Registration {
            receiver: rx,
            sender: tx,
            first_in_session,
        }
    }

    /// Remove a connection. Returns the number of members left in the
    /// session on this node; the session entry is deleted when it hits zero.
    pub async fn detach(&self, session_id: &str, connection_id: Uuid) -> usize {
        let Some(entry) = self.inner.sessions.get(session_id) else {
            return 0;
        };
        let state = Arc::clone(entry.value());
        drop(entry);

        let mut members = state.members.lock().await;
        let before = members.len();
        members.retain(|member| member.connection_id != connection_id);
        let remaining = members.len();
        drop(members);

        if before == remaining {
            return remaining;
        }

        if remaining == 0 {
            self.inner
                .sessions
                .remove_if(session_id, |_, arc| Arc::ptr_eq(arc, &state));
        }

        self.inner.total_connections.fetch_sub(1, Ordering::Relaxed);
        remaining
    }

    /// Fan a frame out to every local member of a session, the host's own
    /// connection included. The frame is serialized once; a member whose
    /// queue is full loses this frame only, a member whose queue is closed
    /// is evicted.
    pub async fn broadcast(&self, session_id: &str, frame: &ServerFrame) -> BroadcastOutcome {
        let Some(entry) = self.inner.sessions.get(session_id) else {
            return BroadcastOutcome::default();
        };
        let state = Arc::clone(entry.value());
        drop(entry);

        let payload = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(err) => {
                warn!(session = %session_id, error = %err, "failed to serialize broadcast frame");
                return BroadcastOutcome::default();
            }
        };

        let pending: Vec<(Uuid, mpsc::Sender<Message>)> = {
            let members = state.members.lock().await;
            members
                .iter()
                .map(|member| (member.connection_id, member.sender.clone()))
                .collect()
        };

        let mut outcome = BroadcastOutcome::default();
        let mut dead = Vec::new();
        for (connection_id, sender) in pending {
            match sender.try_send(Message::Text(payload.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    counter!(
                        "matinee_edge_fanout_drops_total",
                        1,
                        "session" => state.session_id.clone()
                    );
                    warn!(
                        session = %state.session_id,
                        connection = %connection_id,
                        "outbound queue full, dropping frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    outcome.closed += 1;
                    dead.push(connection_id);
                }
            }
        }

        for connection_id in dead {
            self.detach(&state.session_id, connection_id).await;
        }

        outcome
    }

    pub async fn member_count(&self, session_id: &str) -> usize {
        let Some(entry) = self.inner.sessions.get(session_id) else {
            return 0;
        };
        let state = Arc::clone(entry.value());
        drop(entry);
        let count = state.members.lock().await.len();
        count
    }

    /// Sessions currently holding at least one member on this node.
    pub fn session_ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn total_connections(&self) -> i64 {
        self.inner.total_connections.load(Ordering::Relaxed)
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matinee_proto::PlaybackState;

    fn frame(timestamp: i64) -> ServerFrame {
        ServerFrame::state_update(PlaybackState::initial(timestamp), timestamp)
    }

    #[tokio::test]
    async fn attach_detach_tracks_membership() {
        let hub = SessionHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let reg_a = hub.attach("s1", a).await;
        assert!(reg_a.first_in_session);
        let reg_b = hub.attach("s1", b).await;
        assert!(!reg_b.first_in_session);
        assert_eq!(hub.total_connections(), 2);
        assert_eq!(hub.member_count("s1").await, 2);

        assert_eq!(hub.detach("s1", a).await, 1);
        assert_eq!(hub.detach("s1", b).await, 0);
        assert_eq!(hub.total_connections(), 0);
        assert!(hub.session_ids().is_empty());

        // A second attach is once again the first member on this node.
        let reg = hub.attach("s1", Uuid::new_v4()).await;
        assert!(reg.first_in_session);
    }

    #[tokio::test]
    async fn detach_of_unknown_connection_is_a_noop() {
        let hub = SessionHub::new();
        let a = Uuid::new_v4();
        let _reg = hub.attach("s1", a).await;

        assert_eq!(hub.detach("s1", Uuid::new_v4()).await, 1);
        assert_eq!(hub.total_connections(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_once() {
        let hub = SessionHub::new();
        let mut reg_a = hub.attach("s1", Uuid::new_v4()).await;
        let mut reg_b = hub.attach("s1", Uuid::new_v4()).await;

        let outcome = hub.broadcast("s1", &frame(100)).await;
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.dropped, 0);

        for receiver in [&mut reg_a.receiver, &mut reg_b.receiver] {
            let message = receiver.try_recv().expect("frame delivered");
            match message {
                Message::Text(json) => {
                    let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
                    assert!(matches!(parsed, ServerFrame::StateUpdate { .. }));
                }
                other => panic!("unexpected message: {:?}", other),
            }
            assert!(receiver.try_recv().is_err(), "delivered exactly once");
        }
    }

    #[tokio::test]
    async fn slow_consumer_loses_frames_without_stalling_peers() {
        let hub = SessionHub::new();
        let slow = Uuid::new_v4();
        let mut slow_reg = hub.attach("s1", slow).await;
        let mut fast_reg = hub.attach("s1", Uuid::new_v4()).await;

        // Saturate the slow member's queue.
        for i in 0..OUTBOUND_QUEUE_DEPTH {
            hub.broadcast("s1", &frame(i as i64)).await;
            // Keep the fast member drained so only the slow queue fills.
            let _ = fast_reg.receiver.try_recv();
        }

        let outcome = hub.broadcast("s1", &frame(9_999)).await;
        assert_eq!(outcome.dropped, 1, "slow member drops the new frame");
        assert_eq!(outcome.delivered, 1, "fast member still receives it");
        assert!(fast_reg.receiver.try_recv().is_ok());

        // The slow connection stays attached; draining lets it catch up.
        assert_eq!(hub.member_count("s1").await, 2);
        assert!(slow_reg.receiver.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_receiver_is_evicted_on_broadcast() {
        let hub = SessionHub::new();
        let gone = Uuid::new_v4();
        let reg = hub.attach("s1", gone).await;
        let _keep = hub.attach("s1", Uuid::new_v4()).await;
        drop(reg.receiver);

        let outcome = hub.broadcast("s1", &frame(1)).await;
        assert_eq!(outcome.closed, 1);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(hub.member_count("s1").await, 1);
        assert_eq!(hub.total_connections(), 1);
    }
}
