//! Readiness check for the site under test

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

const READY_PATH: &str = "user/login";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll the login page until the site answers or `timeout` elapses
///
/// Any HTTP response below 500 counts as up; connection errors are
/// expected while a local environment is still booting.
pub async fn wait_for_site(base_url: &str, accept_invalid_certs: bool, timeout: Duration) -> E2eResult<()> {
    let check_url = format!("{}/{}", base_url.trim_end_matches('/'), READY_PATH);
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .timeout(Duration::from_secs(5))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < timeout {
        attempts += 1;

        match client.get(&check_url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("Site is up at {} ({})", base_url, resp.status());
                return Ok(());
            }
            Ok(resp) => {
                warn!("Readiness check returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} ...", base_url);
                }
                if !e.is_connect() && !e.is_timeout() {
                    warn!("Readiness check error: {}", e);
                }
            }
        }

        sleep(POLL_INTERVAL).await;
    }

    Err(E2eError::SiteUnreachable(attempts))
}
