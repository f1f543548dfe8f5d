//! Readiness probes: HTTP health endpoints and TCP ports.

use std::time::Duration;

use tracing::{debug, warn};

use super::ProgressCallback;
use crate::signal::SignalGuard;

/// Request timeout for a single health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds a client suitable for health probing.
pub fn probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// One non-blocking probe: any 2xx answer means healthy.
pub async fn http_healthy(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Polls an HTTP endpoint until it answers 2xx or the timeout elapses.
///
/// Connection-refused errors are expected while the service boots and are
/// not logged; other errors are surfaced once at warn level. Progress
/// messages go to the optional callback.
pub async fn wait_http_healthy(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    interval: Duration,
    progress: Option<&ProgressCallback>,
) -> bool {
    let start = tokio::time::Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(progress) = progress {
                    progress(&format!("healthy after {} probes", attempts));
                }
                return true;
            }
            Ok(response) => {
                debug!("health probe {} returned {}", url, response.status());
                if let Some(progress) = progress {
                    progress(&format!("waiting ({})", response.status()));
                }
            }
            Err(err) => {
                if attempts == 1 {
                    if let Some(progress) = progress {
                        progress("waiting for service to start...");
                    }
                }
                if !err.is_connect() {
                    warn!("health probe error: {}", err);
                }
            }
        }

        if SignalGuard::shutdown_requested() {
            warn!("shutdown requested; abandoning health wait");
            return false;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Whether a TCP connection to localhost:`port` currently succeeds.
pub async fn port_open(port: u16) -> bool {
    let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
    matches!(
        tokio::time::timeout(Duration::from_secs(1), connect).await,
        Ok(Ok(_))
    )
}
