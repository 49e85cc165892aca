use reqwest::Client;
use std::time::Duration;

/// Shared outbound client. Timeouts only apply when configured; by default a
/// hung upstream call hangs the caller.
pub fn build_client() -> Client {
    let mut builder = Client::builder();
    if let Some(timeout) = secs_from_env("HTTP_TIMEOUT_SECS") {
        builder = builder.timeout(timeout);
    }
    if let Some(connect) = secs_from_env("HTTP_CONNECT_TIMEOUT_SECS") {
        builder = builder.connect_timeout(connect);
    }
    builder.build().unwrap_or_else(|_| Client::new())
}

fn secs_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
}
