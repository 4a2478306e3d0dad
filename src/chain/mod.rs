pub mod contract;
pub mod verifier;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::ParamType;
use ethers::contract::ContractError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, Log, U256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::settings::ChainConfig;
use contract::SubscriptionVault;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("charge failed: {0}")]
    ChargeFailed(String),

    #[error("chain provider error: {0}")]
    Provider(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("bad address: {0}")]
    BadAddress(String),

    #[error("bad transaction hash: {0}")]
    BadTxHash(String),
}

pub fn parse_address(s: &str) -> Result<Address, ChainError> {
    s.parse::<Address>()
        .map_err(|_| ChainError::BadAddress(s.to_string()))
}

pub fn parse_tx_hash(s: &str) -> Result<H256, ChainError> {
    s.parse::<H256>()
        .map_err(|_| ChainError::BadTxHash(s.to_string()))
}

#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    pub tx_hash: H256,
}

#[derive(Debug, Clone)]
pub struct ReceiptView {
    pub status_ok: bool,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone)]
pub struct TransactionView {
    pub from: Address,
    pub to: Option<Address>,
    pub receipt: Option<ReceiptView>,
}

/// The two chain operations the billing core consumes. The keeper and the
/// verifier only see this trait, never the concrete client.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a charge for one subscriber/plan pair and wait for it to be
    /// mined. Submissions are single-flight: the signing account's nonce is
    /// not safe for concurrent use.
    async fn charge(
        &self,
        subscriber: Address,
        onchain_plan_id: U256,
    ) -> Result<ChargeReceipt, ChainError>;

    /// Read-only lookup of a transaction and its receipt. `None` when the
    /// hash is unknown to the endpoint.
    async fn fetch_transaction(&self, tx_hash: H256)
    -> Result<Option<TransactionView>, ChainError>;
}

type ChargeClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Adapter owning the signing key and the provider connection. Constructed
/// once at process start and shared; there is no module-level singleton.
pub struct EthChainGateway {
    provider: Provider<Http>,
    contract: SubscriptionVault<ChargeClient>,
    contract_address: Address,
    submit_lock: Mutex<()>,
}

impl EthChainGateway {
    pub fn connect(config: &ChainConfig, signer_key: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        let wallet = signer_key
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Signer(e.to_string()))?
            .with_chain_id(config.chain_id);
        let contract_address = parse_address(&config.contract_address)?;
        let client = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let contract = SubscriptionVault::new(contract_address, client);
        Ok(Self {
            provider,
            contract,
            contract_address,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }
}

#[async_trait]
impl ChainClient for EthChainGateway {
    async fn charge(
        &self,
        subscriber: Address,
        onchain_plan_id: U256,
    ) -> Result<ChargeReceipt, ChainError> {
        // Held across submit-and-mine: one in-flight transaction per signer.
        let _guard = self.submit_lock.lock().await;

        let call = self.contract.charge(subscriber, onchain_plan_id);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::ChargeFailed(revert_reason(&e)))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::ChargeFailed(e.to_string()))?
            .ok_or_else(|| ChainError::ChargeFailed("transaction dropped before mining".into()))?;

        if receipt.status != Some(1u64.into()) {
            return Err(ChainError::ChargeFailed(format!(
                "transaction {:#x} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(ChargeReceipt {
            tx_hash: receipt.transaction_hash,
        })
    }

    async fn fetch_transaction(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionView>, ChainError> {
        let tx = self
            .provider
            .get_transaction(tx_hash)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        let Some(tx) = tx else {
            return Ok(None);
        };
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        Ok(Some(TransactionView {
            from: tx.from,
            to: tx.to,
            receipt: receipt.map(|r| ReceiptView {
                status_ok: r.status == Some(1u64.into()),
                logs: r.logs,
            }),
        }))
    }
}

fn revert_reason(err: &ContractError<ChargeClient>) -> String {
    if let ContractError::Revert(data) = err {
        if let Some(reason) = decode_error_string(data) {
            return reason;
        }
    }
    err.to_string()
}

// Standard `Error(string)` revert payload: 4-byte selector 0x08c379a0
// followed by one abi-encoded string.
fn decode_error_string(data: &Bytes) -> Option<String> {
    let payload = data.as_ref().strip_prefix(&[0x08u8, 0xc3, 0x79, 0xa0][..])?;
    let tokens = ethers::abi::decode(&[ParamType::String], payload).ok()?;
    match tokens.into_iter().next()? {
        ethers::abi::Token::String(s) => Some(s),
        _ => None,
    }
}
