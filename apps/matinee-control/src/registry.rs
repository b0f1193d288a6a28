use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use matinee_proto::{EdgeNodeDescriptor, NodeStatus};

/// In-memory view of the edge fleet.
///
/// Registration and heartbeats upsert descriptors; a sweep task evicts
/// entries whose last ping is older than the configured cutoff. Selection
/// reads a snapshot under the read lock and never holds it across I/O.
#[derive(Clone)]
pub struct EdgeRegistry {
    nodes: Arc<RwLock<HashMap<String, EdgeNodeDescriptor>>>,
}

impl EdgeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn upsert(&self, mut descriptor: EdgeNodeDescriptor) {
        descriptor.status = NodeStatus::Active;
        let mut guard = self.nodes.write().await;
        if guard.insert(descriptor.id.clone(), descriptor).is_none() {
            counter!("matinee_control_nodes_registered_total", 1);
        }
    }

    /// Heartbeats from unknown nodes are upserted as well, so a control
    /// restart repopulates the fleet from the next heartbeat wave.
    pub async fn heartbeat(&self, descriptor: EdgeNodeDescriptor) {
        counter!("matinee_control_heartbeats_total", 1, "node" => descriptor.id.clone());
        self.upsert(descriptor).await;
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<EdgeNodeDescriptor> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Pick the edge node new sessions should land on.
    pub async fn select(&self) -> Option<EdgeNodeDescriptor> {
        let guard = self.nodes.read().await;
        let candidates: Vec<EdgeNodeDescriptor> = guard.values().cloned().collect();
        drop(guard);
        select_edge(&candidates)
    }

    /// Remove entries silent for longer than `evict_after`. Returns the ids
    /// that were dropped.
    pub async fn evict_stale(&self, now_secs: i64, evict_after: Duration) -> Vec<String> {
        let cutoff = now_secs - evict_after.as_secs() as i64;
        let mut guard = self.nodes.write().await;
        let dead: Vec<String> = guard
            .values()
            .filter(|node| node.last_ping < cutoff)
            .map(|node| node.id.clone())
            .collect();
        for id in &dead {
            guard.remove(id);
            counter!("matinee_control_nodes_evicted_total", 1);
        }
        dead
    }

    /// Ticker that runs the eviction sweep forever.
    pub fn spawn_sweeper(&self, interval: Duration, evict_after: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = matinee_proto::now_millis() / 1000;
                let evicted = registry.evict_stale(now, evict_after).await;
                for id in &evicted {
                    warn!(node = %id, "evicted edge node after missed heartbeats");
                }
                if !evicted.is_empty() {
                    let remaining = registry.len().await;
                    info!(remaining, "registry sweep complete");
                }
            }
        })
    }
}

/// Least-loaded selection over the current fleet view.
///
/// Filters to active nodes, minimises `current_load / capacity`, and breaks
/// ties by lexicographic id so the choice is deterministic. Returns `None`
/// when no active node exists.
pub fn select_edge(nodes: &[EdgeNodeDescriptor]) -> Option<EdgeNodeDescriptor> {
    nodes
        .iter()
        .filter(|node| node.is_active())
        .min_by(|a, b| {
            a.load_ratio()
                .partial_cmp(&b.load_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, capacity: i32, load: i32, status: NodeStatus) -> EdgeNodeDescriptor {
        EdgeNodeDescriptor {
            id: id.to_string(),
            url: format!("http://{}:8081", id),
            capacity,
            current_load: load,
            status,
            last_ping: 1_000,
        }
    }

    #[test]
    fn selects_minimum_load_ratio() {
        let nodes = vec![
            node("edge-a", 100, 50, NodeStatus::Active),
            node("edge-b", 100, 10, NodeStatus::Active),
            node("edge-c", 10, 9, NodeStatus::Active),
        ];
        let selected = select_edge(&nodes).expect("selected");
        assert_eq!(selected.id, "edge-b");
    }

    #[test]
    fn skips_inactive_nodes() {
        let nodes = vec![
            node("edge-a", 100, 0, NodeStatus::Stale),
            node("edge-b", 100, 90, NodeStatus::Active),
        ];
        let selected = select_edge(&nodes).expect("selected");
        assert_eq!(selected.id, "edge-b");
    }

    #[test]
    fn empty_active_set_selects_nothing() {
        assert!(select_edge(&[]).is_none());
        let nodes = vec![node("edge-a", 100, 0, NodeStatus::Evicted)];
        assert!(select_edge(&nodes).is_none());
    }

    #[test]
    fn ties_break_lexicographically() {
        let nodes = vec![
            node("edge-b", 100, 20, NodeStatus::Active),
            node("edge-a", 100, 20, NodeStatus::Active),
        ];
        let selected = select_edge(&nodes).expect("selected");
        assert_eq!(selected.id, "edge-a");
    }

    #[test]
    fn zero_capacity_ranks_last() {
        let nodes = vec![
            node("edge-a", 0, 0, NodeStatus::Active),
            node("edge-b", 100, 99, NodeStatus::Active),
        ];
        let selected = select_edge(&nodes).expect("selected");
        assert_eq!(selected.id, "edge-b");
    }

    #[tokio::test]
    async fn eviction_removes_silent_nodes_from_candidates() {
        let registry = EdgeRegistry::new();
        let mut fresh = node("edge-a", 100, 0, NodeStatus::Active);
        fresh.last_ping = 1_000;
        let mut silent = node("edge-b", 100, 0, NodeStatus::Active);
        silent.last_ping = 800;
        registry.upsert(fresh).await;
        registry.upsert(silent).await;

        let evicted = registry
            .evict_stale(1_000, Duration::from_secs(60))
            .await;
        assert_eq!(evicted, vec!["edge-b".to_string()]);

        let selected = registry.select().await.expect("selected");
        assert_eq!(selected.id, "edge-a");
    }

    #[tokio::test]
    async fn heartbeat_reactivates_and_updates_load() {
        let registry = EdgeRegistry::new();
        registry.upsert(node("edge-a", 100, 0, NodeStatus::Active)).await;

        let mut beat = node("edge-a", 100, 42, NodeStatus::Active);
        beat.last_ping = 2_000;
        registry.heartbeat(beat).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].current_load, 42);
        assert_eq!(snapshot[0].last_ping, 2_000);
    }
}
