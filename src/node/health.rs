use super::{HealthEndpoint, NodeClient};
use crate::error::HarnessError;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Polling bounds for one candidate.
#[derive(Clone, Copy, Debug)]
pub struct HealthPolicy {
    pub deadline: Duration,
    pub max_request: Duration,
    pub max_poll: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(45),
            max_request: Duration::from_millis(4000),
            max_poll: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthyNode {
    pub url: String,
    pub source: HealthEndpoint,
}

/// Poll one node until either probe reports healthy or the deadline passes.
///
/// Readiness is tried before general health on every poll. Request timeouts
/// and sleeps are both clamped to the time remaining, so the call returns no
/// later than `policy.deadline` after it starts (plus scheduling jitter).
pub fn wait_for_healthy(
    client: &dyn NodeClient,
    url: &str,
    policy: &HealthPolicy,
) -> Result<HealthEndpoint, String> {
    let started = Instant::now();
    let deadline = started + policy.deadline;
    let mut last_error: Option<String> = None;

    loop {
        for endpoint in [HealthEndpoint::Readiness, HealthEndpoint::Health] {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match client.probe_health(url, endpoint, remaining.min(policy.max_request)) {
                Ok(true) => {
                    tracing::debug!(
                        url,
                        endpoint = endpoint.path(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "node healthy"
                    );
                    return Ok(endpoint);
                }
                Ok(false) => last_error = Some(format!("{} reported unhealthy", endpoint.path())),
                Err(err) => last_error = Some(format!("{err:#}")),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(policy.max_poll));
    }

    let mut message = format!(
        "node did not become healthy within {}s: {url}",
        policy.deadline.as_secs_f64()
    );
    if let Some(last_error) = last_error {
        message.push_str(&format!(" (last probe error: {last_error})"));
    }
    Err(message)
}

/// Return the first candidate that becomes healthy, in order.
pub fn resolve_healthy_node(
    client: &dyn NodeClient,
    candidates: &[String],
    policy: &HealthPolicy,
) -> Result<HealthyNode, HarnessError> {
    let mut last_error = String::from("unknown error");
    for candidate in candidates {
        match wait_for_healthy(client, candidate, policy) {
            Ok(source) => {
                return Ok(HealthyNode {
                    url: candidate.clone(),
                    source,
                })
            }
            Err(err) => {
                tracing::warn!(candidate = candidate.as_str(), error = err.as_str(), "node candidate unhealthy");
                last_error = err;
            }
        }
    }
    Err(HarnessError::NodeUnreachable {
        candidates: candidates.to_vec(),
        last_error,
    })
}
