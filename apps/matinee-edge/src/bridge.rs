use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use metrics::counter;
use redis::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use matinee_proto::{now_millis, updates_channel, PlaybackState, ServerFrame};

use crate::hub::SessionHub;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Cross-node fan-in: one listener task per session held on this node, each
/// owning a dedicated pub/sub connection to `session-updates:<id>`.
///
/// Listeners are created when a session's first local member attaches and
/// reclaimed by [`UpdateBridge::spawn_reconciler`] once the session has no
/// local members left; the reconciler also restores any subscription lost to
/// a race between attach and reclaim, so coverage converges within a tick.
#[derive(Clone)]
pub struct UpdateBridge {
    client: Client,
    hub: SessionHub,
    listeners: Arc<DashMap<String, JoinHandle<()>>>,
}

impl UpdateBridge {
    pub fn new(client: Client, hub: SessionHub) -> Self {
        Self {
            client,
            hub,
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// Make sure a listener task exists for this session.
    pub fn ensure_subscribed(&self, session_id: &str) {
        self.listeners
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let client = self.client.clone();
                let hub = self.hub.clone();
                let session_id = session_id.to_string();
                tokio::spawn(async move {
                    run_listener(client, hub, session_id).await;
                })
            });
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.listeners.contains_key(session_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drop listeners for sessions with no local members and resubscribe
    /// sessions that have members but lost their listener.
    pub async fn reconcile(&self) {
        let subscribed: Vec<String> = self
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in subscribed {
            if self.hub.member_count(&session_id).await == 0 {
                if let Some((_, handle)) = self.listeners.remove(&session_id) {
                    handle.abort();
                    debug!(session = %session_id, "released idle bus subscription");
                }
            }
        }

        for session_id in self.hub.session_ids() {
            self.ensure_subscribed(&session_id);
        }
    }

    pub fn spawn_reconciler(&self, interval: Duration) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                bridge.reconcile().await;
            }
        })
    }
}

/// Body of a per-session listener: subscribe, decode, fan out. The
/// subscription is re-established after connection loss.
async fn run_listener(client: Client, hub: SessionHub, session_id: String) {
    let channel = updates_channel(&session_id);
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => {
                if let Err(err) = pubsub.subscribe(&channel).await {
                    warn!(session = %session_id, error = %err, "failed to subscribe to update channel");
                } else {
                    info!(session = %session_id, "subscribed to session updates");
                    let mut stream = pubsub.on_message();
                    while let Some(message) = stream.next().await {
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(session = %session_id, error = %err, "unreadable bus payload");
                                continue;
                            }
                        };
                        dispatch(&hub, &session_id, &payload).await;
                    }
                    warn!(session = %session_id, "update subscription ended, resubscribing");
                }
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "pub/sub connection failed");
            }
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

async fn dispatch(hub: &SessionHub, session_id: &str, payload: &str) {
    let state: PlaybackState = match serde_json::from_str(payload) {
        Ok(state) => state,
        Err(err) => {
            warn!(session = %session_id, error = %err, "undecodable state on update channel");
            return;
        }
    };

    let frame = ServerFrame::state_update(state, now_millis());
    let outcome = hub.broadcast(session_id, &frame).await;
    counter!(
        "matinee_edge_bus_frames_delivered_total",
        outcome.delivered as u64,
        "session" => session_id.to_string()
    );
    debug!(
        session = %session_id,
        delivered = outcome.delivered,
        dropped = outcome.dropped,
        "relayed bus update"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn bridge_with_hub() -> (UpdateBridge, SessionHub) {
        let hub = SessionHub::new();
        // The client is lazy: no connection is made until a listener task
        // first polls, so these tests run without a Redis server.
        let client = Client::open("redis://127.0.0.1:1/").expect("client");
        (UpdateBridge::new(client, hub.clone()), hub)
    }

    #[tokio::test]
    async fn ensure_subscribed_is_idempotent() {
        let (bridge, _hub) = bridge_with_hub();
        bridge.ensure_subscribed("s1");
        bridge.ensure_subscribed("s1");
        assert_eq!(bridge.subscription_count(), 1);
        assert!(bridge.is_subscribed("s1"));
    }

    #[tokio::test]
    async fn listeners_are_kept_per_session_not_per_process() {
        let (bridge, _hub) = bridge_with_hub();
        bridge.ensure_subscribed("s1");
        bridge.ensure_subscribed("s2");
        bridge.ensure_subscribed("s3");
        assert_eq!(bridge.subscription_count(), 3);
    }

    #[tokio::test]
    async fn reconcile_releases_idle_and_restores_active_sessions() {
        let (bridge, hub) = bridge_with_hub();

        // s1 has a member but no listener; s2 has a listener but no member.
        let _reg = hub.attach("s1", Uuid::new_v4()).await;
        bridge.ensure_subscribed("s2");

        bridge.reconcile().await;

        assert!(bridge.is_subscribed("s1"));
        assert!(!bridge.is_subscribed("s2"));
        assert_eq!(bridge.subscription_count(), 1);
    }
}
