use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use matinee_proto::{now_millis, EdgeNodeDescriptor, NodeStatus};

use crate::{config::Config, hub::SessionHub};

const REGISTER_ATTEMPTS: u32 = 5;
const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Descriptor this node reports to the control plane.
pub fn descriptor(config: &Config, current_load: i64) -> EdgeNodeDescriptor {
    EdgeNodeDescriptor {
        id: config.server_id.clone(),
        url: config.server_url.clone(),
        capacity: config.capacity,
        current_load: current_load as i32,
        status: NodeStatus::Active,
        last_ping: now_millis() / 1000,
    }
}

/// Announce this node to the control plane. Retries a few times on boot;
/// persistent failure is tolerated because every heartbeat is an upsert and
/// re-registers us on the next tick.
pub async fn register(client: &reqwest::Client, config: &Config) {
    let url = format!("{}/api/streaming-servers/register", config.control_url);
    for attempt in 1..=REGISTER_ATTEMPTS {
        match client
            .post(&url)
            .json(&descriptor(config, 0))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!(control = %config.control_url, "registered with control node");
                return;
            }
            Ok(response) => {
                warn!(status = %response.status(), attempt, "control node rejected registration");
            }
            Err(err) => {
                warn!(error = %err, attempt, "failed to reach control node");
            }
        }
        tokio::time::sleep(REGISTER_RETRY_DELAY).await;
    }
    warn!("registration attempts exhausted, relying on heartbeats");
}

/// Periodic heartbeat reporting the live connection count. Failures are
/// logged and retried on the next tick; the task never exits.
pub fn spawn_heartbeat(config: Config, hub: SessionHub) -> JoinHandle<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/streaming-servers/heartbeat", config.control_url);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.heartbeat_interval);
        // The immediate first tick doubles as a registration fallback.
        loop {
            ticker.tick().await;
            let body = descriptor(&config, hub.total_connections());
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    counter!("matinee_edge_heartbeats_total", 1);
                }
                Ok(response) => {
                    warn!(status = %response.status(), "heartbeat rejected by control node");
                }
                Err(err) => {
                    warn!(error = %err, "heartbeat failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config() -> Config {
        Config::from(crate::config::Cli::parse_from([
            "matinee-edge",
            "--server-id",
            "edge-test",
            "--server-url",
            "http://localhost:9999",
            "--capacity",
            "25",
        ]))
    }

    #[test]
    fn descriptor_reports_live_load() {
        let descriptor = descriptor(&config(), 7);
        assert_eq!(descriptor.id, "edge-test");
        assert_eq!(descriptor.url, "http://localhost:9999");
        assert_eq!(descriptor.capacity, 25);
        assert_eq!(descriptor.current_load, 7);
        assert_eq!(descriptor.status, NodeStatus::Active);
        assert!(descriptor.last_ping > 0);
    }
}
