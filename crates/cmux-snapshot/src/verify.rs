//! External verification of the provisioned instance.
//!
//! Probes the DevTools endpoint through the publicly exposed URL (not
//! loopback) to confirm the whole path — proxy, service, instance network —
//! works end to end.

use anyhow::bail;
use std::time::Duration;
use tracing::info;

const MAX_ATTEMPTS: u32 = 45;
const ATTEMPT_DELAY: Duration = Duration::from_secs(2);

/// Poll `GET {cdp_base}/json/version` until it answers 200.
pub async fn verify_devtools_via_exposed_url(cdp_base_url: &str) -> anyhow::Result<()> {
    let version_url = format!("{}/json/version", cdp_base_url.trim_end_matches('/'));
    info!("verifying DevTools via exposed URL: {version_url}");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    for attempt in 1..=MAX_ATTEMPTS {
        match client
            .get(&version_url)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(response) if response.status().as_u16() == 200 => {
                info!("DevTools endpoint is reachable via exposed URL");
                return Ok(());
            }
            Ok(response) => {
                info!(
                    "attempt {attempt}/{MAX_ATTEMPTS} returned HTTP {} from DevTools",
                    response.status().as_u16()
                );
            }
            Err(err) => {
                info!("attempt {attempt}/{MAX_ATTEMPTS} failed to reach DevTools: {err}");
            }
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(ATTEMPT_DELAY).await;
        }
    }
    bail!("DevTools endpoint not reachable via exposed URL after {MAX_ATTEMPTS} attempts")
}
