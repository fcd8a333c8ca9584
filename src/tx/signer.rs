//! Transaction signing

use super::transaction::EthTransaction;
use crate::error::{WalletError, WalletResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes};
use std::collections::HashMap;
use tracing::info;

/// Signs and RLP-serializes a transaction whose nonce has been stamped
#[cfg_attr(test, mockall::automock)]
pub trait TxSigner: Send + Sync {
    fn sign(&self, from: Address, tx: &EthTransaction) -> WalletResult<Bytes>;
}

/// In-process keyring of local private keys
#[derive(Default)]
pub struct KeyringSigner {
    wallets: HashMap<Address, LocalWallet>,
}

impl KeyringSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hex-encoded private key, returning its address
    pub fn add_private_key(&mut self, key: &str) -> WalletResult<Address> {
        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| WalletError::Wallet(format!("Invalid private key: {}", e)))?;
        let address = wallet.address();
        self.wallets.insert(address, wallet);
        Ok(address)
    }

    /// Load a comma-separated list of keys from the named environment variable
    pub fn from_env(var_name: &str) -> WalletResult<Self> {
        let keys = std::env::var(var_name).map_err(|_| {
            WalletError::Wallet(format!(
                "No wallet configured. Set {} to one or more private keys",
                var_name
            ))
        })?;

        let mut signer = Self::new();
        for key in keys.split(',').filter(|k| !k.trim().is_empty()) {
            let address = signer.add_private_key(key)?;
            info!("Loaded signing key for {:?}", address);
        }
        Ok(signer)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.wallets.keys().copied().collect()
    }
}

impl TxSigner for KeyringSigner {
    fn sign(&self, from: Address, tx: &EthTransaction) -> WalletResult<Bytes> {
        let wallet = self
            .wallets
            .get(&from)
            .ok_or_else(|| WalletError::Wallet(format!("No signing key for {:?}", from)))?
            .clone()
            .with_chain_id(tx.chain_id);

        let typed = tx.to_typed(from)?;
        let signature = wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| WalletError::Wallet(e.to_string()))?;
        Ok(typed.rlp_signed(&signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    // Well-known development key (anvil account 0)
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_sign_requires_known_address() {
        let signer = KeyringSigner::new();
        let tx = EthTransaction {
            nonce: Some(U256::zero()),
            gas_limit: U256::from(21_000),
            chain_id: 1,
            ..Default::default()
        };
        assert!(signer.sign(Address::repeat_byte(1), &tx).is_err());
    }

    #[test]
    fn test_sign_produces_payload() {
        let mut signer = KeyringSigner::new();
        let from = signer.add_private_key(DEV_KEY).unwrap();
        assert_eq!(signer.addresses(), vec![from]);

        let tx = EthTransaction {
            to: Some(Address::repeat_byte(0x42)),
            value: U256::from(1),
            nonce: Some(U256::from(3)),
            gas_limit: U256::from(21_000),
            chain_id: 31337,
            ..Default::default()
        };
        let raw = signer.sign(from, &tx).unwrap();
        assert!(!raw.is_empty());
    }

    #[test]
    fn test_rejects_malformed_key() {
        let mut signer = KeyringSigner::new();
        assert!(signer.add_private_key("not-a-key").is_err());
    }
}
