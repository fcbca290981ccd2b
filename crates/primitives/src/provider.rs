//! Utils for creating ethers providers

use crate::constants::bundler::{RPC_CALL_RETRIES, RPC_RETRY_BACKOFF};
use ethers::{
    providers::{Http, Middleware, Provider, Ws},
    types::Chain,
};
use std::{future::Future, time::Duration};

/// Creates ethers provider with HTTP connection
pub async fn create_http_provider(addr: &str) -> eyre::Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(addr)?;

    let chain_id = provider.get_chainid().await?;

    Ok(provider.interval(if chain_id == Chain::Dev.into() {
        Duration::from_millis(5u64)
    } else {
        Duration::from_millis(500u64)
    }))
}

/// Creates ethers provider with WebSockets connection
pub async fn create_ws_provider(addr: &str) -> eyre::Result<Provider<Ws>> {
    let provider = Provider::<Ws>::connect_with_reconnects(addr, usize::MAX).await?;
    Ok(provider)
}

/// Retries a transient-failure-prone RPC call a fixed number of times with a
/// fixed backoff, surfacing the last error if all attempts fail
pub async fn retry_rpc_call<T, E, Fut, F>(mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(res) => return Ok(res),
            Err(err) if attempt < RPC_CALL_RETRIES => {
                tracing::warn!(
                    "RPC call failed (attempt {attempt}/{RPC_CALL_RETRIES}): {err}, retrying"
                );
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_BACKOFF)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_surfaces_last_error() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), String> = retry_rpc_call(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("boom {n}")) }
        })
        .await;
        assert_eq!(res.unwrap_err(), "boom 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_on_success() {
        let calls = AtomicUsize::new(0);
        let res: Result<u64, String> = retry_rpc_call(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
