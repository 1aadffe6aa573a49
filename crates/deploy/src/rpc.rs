//! Shared RPC utilities for interacting with the node's JSON-RPC endpoint.

use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .filter(|value| !value.is_null())
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a JSON-RPC hex quantity (`0x`-prefixed) into a `u64`.
pub fn parse_quantity(quantity: &str) -> Result<u64, anyhow::Error> {
    let digits = quantity
        .strip_prefix("0x")
        .with_context(|| format!("Quantity is not 0x-prefixed: {quantity}"))?;
    if digits.is_empty() {
        anyhow::bail!("Quantity has no digits: {quantity}");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity: {quantity}"))
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// The check is attempted at most `attempts` times with `interval` between
/// attempts.
///
/// # Returns
/// Ok(()) when the service is ready, or the last check error once attempts are exhausted.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    attempts: usize,
    interval: Duration,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let backoff = ConstantBuilder::default()
        .with_delay(interval)
        .with_max_times(attempts.saturating_sub(1));

    check_fn
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .notify(|err: &anyhow::Error, _| {
            tracing::trace!(error = %err, service = %name, "Readiness check failed, retrying...");
        })
        .await
        .with_context(|| format!("{} not ready after {} attempts", name, attempts.max(1)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert!(parse_quantity("1a").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries_until_success() {
        let calls = AtomicUsize::new(0);

        wait_until_ready("test", 5, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(anyhow::anyhow!("not yet"));
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let calls = AtomicUsize::new(0);

        let result = wait_until_ready("test", 3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("never ready"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
