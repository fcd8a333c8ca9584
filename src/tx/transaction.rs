//! Unsigned wallet transactions and their conversion to ethers typed transactions

use crate::error::{WalletError, WalletResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};
use serde::{Deserialize, Serialize};

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GasPrice {
    Legacy { gas_price: U256 },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl Default for GasPrice {
    fn default() -> Self {
        GasPrice::Legacy {
            gas_price: U256::zero(),
        }
    }
}

/// A transaction as submitted by the caller; the nonce is assigned at approval
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthTransaction {
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    pub gas_limit: U256,
    #[serde(default)]
    pub gas_price: GasPrice,
    #[serde(default)]
    pub nonce: Option<U256>,
    pub chain_id: u64,
}

impl EthTransaction {
    /// Build the ethers typed transaction sent from `from`.
    ///
    /// Fails when no nonce has been stamped yet.
    pub fn to_typed(&self, from: Address) -> WalletResult<TypedTransaction> {
        let nonce = self.nonce.ok_or_else(|| {
            WalletError::Transaction("cannot build transaction without a nonce".to_string())
        })?;

        let typed_tx = match &self.gas_price {
            GasPrice::Legacy { gas_price } => {
                let mut tx = TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(nonce)
                    .gas(self.gas_limit)
                    .gas_price(*gas_price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(nonce)
                    .gas(self.gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Eip1559(tx)
            }
        };

        Ok(typed_tx)
    }
}

/// Parse a hex account address, with or without `0x`, in any letter case
pub fn parse_address(input: &str) -> WalletResult<Address> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase();

    let bytes = hex::decode(&digits)
        .map_err(|e| WalletError::Transaction(format!("Invalid address {}: {}", input, e)))?;
    if bytes.len() != Address::len_bytes() {
        return Err(WalletError::Transaction(format!(
            "Invalid address {}: expected 20 bytes, got {}",
            input,
            bytes.len()
        )));
    }

    Ok(Address::from_slice(&bytes))
}
