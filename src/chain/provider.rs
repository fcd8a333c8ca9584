//! Chain provider with multi-RPC support and automatic failover

use super::{NetworkClient, Publisher, TxReceipt};
use crate::config::NetworkConfig;
use crate::error::{WalletError, WalletResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: NetworkConfig) -> WalletResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(WalletError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        let result = self
            .with_failover("block number", |provider| async move {
                provider.get_block_number().await
            })
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Run a read request against each provider in turn until one succeeds
    async fn with_failover<'a, T, F, Fut>(&'a self, operation: &str, request: F) -> WalletResult<T>
    where
        F: Fn(&'a Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let request_timeout = Duration::from_millis(self.config.request_timeout_ms);

        for _ in 0..self.http_providers.len() {
            match timeout(request_timeout, request(self.http())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        "Failed to get {} from chain {}: {}",
                        operation, self.config.chain_id, e
                    );
                }
                Err(_) => {
                    warn!("Timed out getting {} from chain {}", operation, self.config.chain_id);
                }
            }
            self.failover();
        }

        Err(WalletError::ChainConnection {
            chain_id: self.config.chain_id,
            message: format!("All providers failed to get {}", operation),
        })
    }
}

#[async_trait]
impl NetworkClient for ChainProvider {
    async fn get_transaction_count(&self, address: Address) -> WalletResult<U256> {
        self.with_failover("transaction count", |provider| async move {
            provider.get_transaction_count(address, None).await
        })
        .await
    }

    async fn get_transaction_receipt(&self, tx_hash: H256) -> WalletResult<Option<TxReceipt>> {
        let receipt = self
            .with_failover("transaction receipt", |provider| async move {
                provider.get_transaction_receipt(tx_hash).await
            })
            .await?;

        Ok(receipt.and_then(|r| {
            r.block_number.map(|block| TxReceipt {
                block_number: block.as_u64(),
                success: r.status.map_or(true, |s| s.as_u64() == 1),
            })
        }))
    }
}

#[async_trait]
impl Publisher for ChainProvider {
    /// Broadcast through the active provider only; a raw transaction is not
    /// resent to another endpoint after an ambiguous failure.
    async fn publish(&self, signed_tx: Bytes) -> WalletResult<H256> {
        let send_timeout = Duration::from_millis(self.config.request_timeout_ms);
        let result = timeout(send_timeout, self.http().send_raw_transaction(signed_tx)).await;

        match result {
            Ok(Ok(pending_tx)) => {
                let tx_hash = pending_tx.tx_hash();
                debug!("Transaction sent on chain {}: {:?}", self.config.chain_id, tx_hash);
                Ok(tx_hash)
            }
            Ok(Err(e)) => Err(WalletError::Transaction(e.to_string())),
            Err(_) => Err(WalletError::Timeout {
                operation: "send transaction".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rpc_urls: Vec<&str>) -> NetworkConfig {
        NetworkConfig {
            chain_id: 1,
            rpc_urls: rpc_urls.into_iter().map(String::from).collect(),
            request_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_requires_a_valid_provider() {
        let err = ChainProvider::new(config(vec!["not a url"])).err().unwrap();
        assert!(matches!(err, WalletError::ChainConnection { chain_id: 1, .. }));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let provider =
            ChainProvider::new(config(vec!["http://127.0.0.1:8545", "http://127.0.0.1:8546"]))
                .unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(provider.chain_id(), 1);
    }
}
