// webhook.rs — Outbound approval notifications, SSRF-hardened.
//
// The gate manager can notify an external system when an approval becomes
// pending. Because the webhook URL comes from the policy file, this is an
// attacker-reachable egress point: a crafted URL could otherwise coerce
// the engine into calling loopback services, RFC1918 hosts, or the cloud
// metadata endpoint. The validators already rejected non-http(s) schemes
// at load time; this module re-checks on use, after name resolution,
// because a DNS answer can differ from what the URL looks like.
//
// Delivery is fire-and-forget: a rejected URL or a failed POST is logged
// and dropped. Webhook success is irrelevant to decision correctness.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::Value;

/// Total connect+read budget for one delivery attempt. No retries.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the shared webhook client. Returns `None` (with a log line) if
/// the TLS backend cannot be initialized; webhooks are then disabled.
pub fn build_client() -> Option<reqwest::Client> {
    match reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build() {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::error!(error = %err, "failed to build webhook client, webhooks disabled");
            None
        }
    }
}

/// Deliver a payload to `url`, or silently drop it if the URL fails the
/// egress checks. Never returns an error to the caller.
pub async fn deliver(client: &reqwest::Client, url: &str, payload: &Value) {
    if let Some(reason) = rejection_reason(url).await {
        // The drop itself is the audit record: a structured event naming
        // the URL and why it was refused.
        tracing::warn!(url, reason = %reason, "webhook rejected, notification dropped");
        return;
    }

    match client.post(url).json(payload).send().await {
        Ok(response) => {
            tracing::debug!(url, status = %response.status(), "webhook delivered");
        }
        Err(err) => {
            tracing::debug!(url, error = %err, "webhook delivery failed");
        }
    }
}

/// Check a webhook URL against the egress policy. Returns the reason the
/// URL must be rejected, or `None` if it may be contacted.
pub async fn rejection_reason(url: &str) -> Option<String> {
    let parsed = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed,
        Err(err) => return Some(format!("unparseable URL: {}", err)),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Some(format!("scheme '{}' is not http or https", other)),
    }

    let host = match parsed.host_str() {
        Some(host) => host.trim_matches(['[', ']']).to_string(),
        None => return Some("URL has no host".to_string()),
    };
    let port = parsed.port_or_known_default().unwrap_or(80);

    // An IP literal needs no resolution; otherwise resolve and check every
    // address the name maps to.
    if let Ok(addr) = host.parse::<IpAddr>() {
        return blocked_range(addr).map(|range| format!("{} resolves to {} ({})", host, addr, range));
    }

    let addrs = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(addrs) => addrs,
        Err(err) => return Some(format!("failed to resolve '{}': {}", host, err)),
    };
    for addr in addrs {
        if let Some(range) = blocked_range(addr.ip()) {
            return Some(format!("{} resolves to {} ({})", host, addr.ip(), range));
        }
    }
    None
}

/// Classify an address against the blocked ranges. Returns the name of
/// the range it falls in, or `None` for a publicly-routable address.
fn blocked_range(addr: IpAddr) -> Option<&'static str> {
    match addr {
        IpAddr::V4(v4) => {
            if v4.is_unspecified() {
                Some("unspecified")
            } else if v4.is_loopback() {
                Some("loopback")
            } else if v4.is_link_local() {
                // 169.254/16, which also covers the 169.254.169.254
                // metadata endpoint.
                Some("link-local")
            } else if v4.is_private() {
                Some("private (RFC1918)")
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            // IPv4-mapped addresses inherit the verdict of the inner v4.
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return blocked_range(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            if v6.is_unspecified() {
                Some("unspecified")
            } else if v6.is_loopback() {
                Some("loopback")
            } else if (first & 0xffc0) == 0xfe80 {
                Some("link-local")
            } else if (first & 0xfe00) == 0xfc00 {
                // fc00::/7 unique-local, which covers fd00:ec2::254.
                Some("unique-local")
            } else {
                None
            }
        }
    }
}
