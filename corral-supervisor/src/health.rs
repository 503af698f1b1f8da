//! Worker health probing

use std::time::Duration;
use tracing::{debug, warn};

/// Polls `GET http://127.0.0.1:{port}/health` until it answers with a 2xx
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    attempts: u32,
    delay: Duration,
    request_timeout: Duration,
}

impl HealthProber {
    pub fn new(attempts: u32, delay: Duration, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            attempts,
            delay,
            request_timeout,
        }
    }

    /// Probe with the configured budget
    pub async fn probe(&self, port: u16) -> bool {
        self.probe_with(port, self.attempts, self.delay).await
    }

    /// Fixed-budget polling loop; `true` on the first healthy answer
    pub async fn probe_with(&self, port: u16, attempts: u32, delay: Duration) -> bool {
        for attempt in 1..=attempts {
            if self.probe_once(port).await {
                debug!(port, attempt, "worker healthy");
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        warn!(port, attempts, "worker did not become healthy");
        false
    }

    /// One short-timeout request
    pub async fn probe_once(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new(30, Duration::from_millis(200), Duration::from_secs(1))
    }
}
