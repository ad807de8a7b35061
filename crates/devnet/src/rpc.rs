//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, U256};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::probe::{ChainProbe, TransferSender};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between receipt lookups.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Receipt lookups before a transfer is considered lost.
const RECEIPT_ATTEMPTS: usize = 30;

/// Gas limit of a plain value transfer.
const TRANSFER_GAS: &str = "0x5208";

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
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

    extract_result(result, method)
}

/// Pull the `result` member out of a JSON-RPC response body.
fn extract_result<T: DeserializeOwned>(response: Value, method: &str) -> Result<T, anyhow::Error> {
    if let Some(error) = response.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = response
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(quantity: &str) -> Result<u64, anyhow::Error> {
    let digits = quantity
        .strip_prefix("0x")
        .with_context(|| format!("Quantity is not 0x-prefixed: {}", quantity))?;
    if digits.is_empty() {
        anyhow::bail!("Empty hex quantity");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity: {}", quantity))
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout_secs` - Maximum time to wait in seconds
/// * `check_fn` - Function that returns Ok(()) when the service is ready
///
/// # Returns
/// Ok(()) when the service is ready, or an error after timeout.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout_secs: u64,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let max_duration = Duration::from_secs(timeout_secs);

    loop {
        if start.elapsed() > max_duration {
            anyhow::bail!("Timeout waiting for {} to be ready", name);
        }

        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// Send a value transfer through `eth_sendTransaction` and return its hash.
///
/// The sender must be an account unlocked on the node behind `url`.
pub async fn send_transaction(
    client: &reqwest::Client,
    url: &str,
    from: Address,
    to: Address,
    value: U256,
) -> Result<String, anyhow::Error> {
    let tx_hash: String = json_rpc_call(
        client,
        url,
        "eth_sendTransaction",
        vec![serde_json::json!({
            "from": from,
            "to": to,
            "value": value,
            "gas": TRANSFER_GAS,
        })],
    )
    .await?;

    if tx_hash.is_empty() {
        anyhow::bail!("No transaction hash returned");
    }

    Ok(tx_hash)
}

/// The parts of a transaction receipt benchy looks at.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// Receipts without a status field predate byzantium and are treated as successful.
    pub fn succeeded(&self) -> bool {
        self.status.as_deref().is_none_or(|s| s == "0x1")
    }
}

/// Poll `eth_getTransactionReceipt` until the transaction is mined.
pub async fn wait_for_receipt(
    client: &reqwest::Client,
    url: &str,
    tx_hash: &str,
    attempts: usize,
) -> Result<TransactionReceipt, anyhow::Error> {
    let fetch = move || async move {
        let receipt: Option<TransactionReceipt> = json_rpc_call(
            client,
            url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx_hash)],
        )
        .await?;
        receipt.with_context(|| format!("Transaction {} not mined yet", tx_hash))
    };

    fetch
        .retry(
            ConstantBuilder::default()
                .with_delay(RECEIPT_POLL_INTERVAL)
                .with_max_times(attempts),
        )
        .notify(|err: &anyhow::Error, after: Duration| {
            tracing::trace!(error = %err, ?after, tx_hash, "Receipt not available, retrying...");
        })
        .await
}

/// Pool counters returned by `txpool_status`.
#[derive(Debug, Deserialize)]
struct TxPoolStatus {
    pending: String,
    queued: String,
}

/// [`ChainProbe`] backed by JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct RpcChainProbe {
    client: reqwest::Client,
}

impl RpcChainProbe {
    pub fn new() -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
        })
    }

    async fn quantity(&self, url: &str, method: &str, params: Vec<Value>) -> Option<u64> {
        let result: Result<String, _> = json_rpc_call(&self.client, url, method, params).await;
        match result.and_then(|q| parse_hex_u64(&q)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::trace!(error = %e, url, method, "RPC query failed");
                None
            }
        }
    }
}

impl ChainProbe for RpcChainProbe {
    async fn block_number(&self, url: &str) -> Option<u64> {
        self.quantity(url, "eth_blockNumber", vec![]).await
    }

    async fn balance(&self, url: &str, address: Address) -> Option<U256> {
        json_rpc_call(
            &self.client,
            url,
            "eth_getBalance",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
        .inspect_err(|e| tracing::trace!(error = %e, url, %address, "Balance query failed"))
        .ok()
    }

    async fn transaction_count(&self, url: &str, address: Address) -> Option<u64> {
        self.quantity(
            url,
            "eth_getTransactionCount",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn pending_transactions(&self, url: &str) -> Option<u64> {
        let status: TxPoolStatus = json_rpc_call(&self.client, url, "txpool_status", vec![])
            .await
            .ok()?;
        let pending = parse_hex_u64(&status.pending).ok()?;
        let queued = parse_hex_u64(&status.queued).ok()?;
        Some(pending + queued)
    }

    async fn accounts(&self, url: &str) -> Result<Vec<Address>, anyhow::Error> {
        json_rpc_call(&self.client, url, "eth_accounts", vec![]).await
    }
}

impl TransferSender for RpcChainProbe {
    async fn send_transfer(
        &self,
        url: &str,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<String, anyhow::Error> {
        send_transaction(&self.client, url, from, to, value).await
    }

    async fn confirm_transfer(&self, url: &str, tx_hash: &str) -> Result<(), anyhow::Error> {
        let receipt = wait_for_receipt(&self.client, url, tx_hash, RECEIPT_ATTEMPTS).await?;
        if !receipt.succeeded() {
            anyhow::bail!(
                "Transaction {} reverted in block {}",
                receipt.transaction_hash,
                receipt.block_number
            );
        }
        Ok(())
    }
}
