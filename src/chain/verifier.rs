use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use serde::Serialize;

use crate::chain::contract::{self, DecodedLog};
use crate::chain::{ChainClient, TransactionView};
use crate::error::BillingError;

/// Outcome of checking a claimed payment transaction. A rejection is an
/// expected result, not an error; `reason` is surfaced verbatim to the
/// checkout caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Address>,
}

impl VerificationResult {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            reason: Some(reason.into()),
            amount: None,
            token: None,
        }
    }

    fn confirmed(amount: U256, token: Address) -> Self {
        Self {
            verified: true,
            reason: None,
            amount: Some(amount),
            token: Some(token),
        }
    }
}

/// Validates a claimed payment transaction against chain data only. Nothing
/// client-asserted is trusted: plan id, subscriber and amount all come from
/// the decoded event.
pub struct TransactionVerifier {
    chain: Arc<dyn ChainClient + Send + Sync>,
    contract_address: Address,
}

impl TransactionVerifier {
    pub fn new(chain: Arc<dyn ChainClient + Send + Sync>, contract_address: Address) -> Self {
        Self {
            chain,
            contract_address,
        }
    }

    /// Ordered rejection gates; the first failing gate decides the reason.
    /// Chain connectivity problems surface as errors, never as rejections.
    pub async fn verify(
        &self,
        tx_hash: H256,
        expected_subscriber: Address,
        expected_onchain_plan_id: U256,
    ) -> Result<VerificationResult, BillingError> {
        let Some(tx) = self.chain.fetch_transaction(tx_hash).await? else {
            return Ok(VerificationResult::rejected("Transaction not found"));
        };

        if tx.to != Some(self.contract_address) {
            return Ok(VerificationResult::rejected(
                "Transaction not sent to Subscription contract",
            ));
        }

        let Some(receipt) = receipt_if_mined(&tx) else {
            return Ok(VerificationResult::rejected("Transaction failed or not mined"));
        };

        if tx.from != expected_subscriber {
            return Ok(VerificationResult::rejected("Transaction wallet mismatch"));
        }

        let mut event = None;
        for log in &receipt.logs {
            match contract::decode_subscription_log(self.contract_address, log) {
                DecodedLog::Subscribed {
                    subscriber,
                    plan_id,
                    token,
                    amount,
                } => {
                    event = Some((subscriber, plan_id, token, amount));
                    break;
                }
                DecodedLog::Unrelated | DecodedLog::Undecodable => {}
            }
        }
        let Some((subscriber, plan_id, token, amount)) = event else {
            return Ok(VerificationResult::rejected(
                "No Subscribed event found in transaction",
            ));
        };

        if plan_id != expected_onchain_plan_id {
            return Ok(VerificationResult::rejected(format!(
                "Plan ID mismatch: expected {expected_onchain_plan_id}, got {plan_id}"
            )));
        }

        if subscriber != expected_subscriber {
            return Ok(VerificationResult::rejected(
                "Subscriber wallet mismatch in event",
            ));
        }

        Ok(VerificationResult::confirmed(amount, token))
    }
}

fn receipt_if_mined(tx: &TransactionView) -> Option<&crate::chain::ReceiptView> {
    tx.receipt.as_ref().filter(|r| r.status_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::contract::SubscribedFilter;
    use crate::chain::{ChainError, ChargeReceipt, ReceiptView};
    use async_trait::async_trait;
    use ethers::abi::Token;
    use ethers::contract::EthEvent;
    use ethers::types::{Bytes, Log};

    struct StaticChain {
        tx: Option<TransactionView>,
    }

    #[async_trait]
    impl ChainClient for StaticChain {
        async fn charge(
            &self,
            _subscriber: Address,
            _onchain_plan_id: U256,
        ) -> Result<ChargeReceipt, ChainError> {
            unreachable!("verification never charges")
        }

        async fn fetch_transaction(
            &self,
            _tx_hash: H256,
        ) -> Result<Option<TransactionView>, ChainError> {
            Ok(self.tx.clone())
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const CONTRACT: u64 = 0xC0;
    const SUBSCRIBER: u64 = 0x51;
    const TOKEN: u64 = 0x70;

    fn subscribed_log(emitter: Address, subscriber: Address, plan_id: u64, amount: u128) -> Log {
        let mut subscriber_topic = [0u8; 32];
        subscriber_topic[12..].copy_from_slice(subscriber.as_bytes());
        Log {
            address: emitter,
            topics: vec![SubscribedFilter::signature(), H256::from(subscriber_topic)],
            data: Bytes::from(ethers::abi::encode(&[
                Token::Uint(U256::from(plan_id)),
                Token::Address(addr(TOKEN)),
                Token::Uint(U256::from(amount)),
            ])),
            ..Default::default()
        }
    }

    fn good_tx() -> TransactionView {
        TransactionView {
            from: addr(SUBSCRIBER),
            to: Some(addr(CONTRACT)),
            receipt: Some(ReceiptView {
                status_ok: true,
                logs: vec![subscribed_log(addr(CONTRACT), addr(SUBSCRIBER), 4, 5_000_000)],
            }),
        }
    }

    fn verifier(tx: Option<TransactionView>) -> TransactionVerifier {
        TransactionVerifier::new(Arc::new(StaticChain { tx }), addr(CONTRACT))
    }

    async fn run(verifier: &TransactionVerifier, plan_id: u64) -> VerificationResult {
        verifier
            .verify(H256::repeat_byte(0xaa), addr(SUBSCRIBER), U256::from(plan_id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_unknown_hash() {
        let v = verifier(None);
        let result = run(&v, 4).await;
        assert!(!result.verified);
        assert_eq!(result.reason.as_deref(), Some("Transaction not found"));
    }

    #[tokio::test]
    async fn rejects_wrong_recipient() {
        let mut tx = good_tx();
        tx.to = Some(addr(0xBEEF));
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(
            result.reason.as_deref(),
            Some("Transaction not sent to Subscription contract")
        );
    }

    #[tokio::test]
    async fn rejects_unmined_transaction() {
        let mut tx = good_tx();
        tx.receipt = None;
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(result.reason.as_deref(), Some("Transaction failed or not mined"));
    }

    #[tokio::test]
    async fn rejects_reverted_transaction() {
        let mut tx = good_tx();
        tx.receipt.as_mut().unwrap().status_ok = false;
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(result.reason.as_deref(), Some("Transaction failed or not mined"));
    }

    #[tokio::test]
    async fn rejects_sender_mismatch() {
        let mut tx = good_tx();
        tx.from = addr(0xBAD);
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(result.reason.as_deref(), Some("Transaction wallet mismatch"));
    }

    #[tokio::test]
    async fn rejects_when_no_subscribed_event() {
        let mut tx = good_tx();
        // Same event shape, emitted by an unrelated contract.
        tx.receipt.as_mut().unwrap().logs =
            vec![subscribed_log(addr(0xDEAD), addr(SUBSCRIBER), 4, 5_000_000)];
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(
            result.reason.as_deref(),
            Some("No Subscribed event found in transaction")
        );
    }

    #[tokio::test]
    async fn rejects_plan_id_mismatch_naming_both_ids() {
        let mut tx = good_tx();
        tx.receipt.as_mut().unwrap().logs =
            vec![subscribed_log(addr(CONTRACT), addr(SUBSCRIBER), 7, 5_000_000)];
        let result = run(&verifier(Some(tx)), 4).await;
        assert!(!result.verified);
        let reason = result.reason.unwrap();
        assert!(reason.contains('7') && reason.contains('4'), "reason: {reason}");
    }

    #[tokio::test]
    async fn rejects_event_subscriber_mismatch() {
        let mut tx = good_tx();
        tx.receipt.as_mut().unwrap().logs =
            vec![subscribed_log(addr(CONTRACT), addr(0xBAD), 4, 5_000_000)];
        let result = run(&verifier(Some(tx)), 4).await;
        assert_eq!(
            result.reason.as_deref(),
            Some("Subscriber wallet mismatch in event")
        );
    }

    #[tokio::test]
    async fn confirms_matching_transaction_with_decoded_amount() {
        let v = verifier(Some(good_tx()));
        let result = run(&v, 4).await;
        assert!(result.verified);
        assert_eq!(result.reason, None);
        assert_eq!(result.amount, Some(U256::from(5_000_000u64)));
        assert_eq!(result.token, Some(addr(TOKEN)));
    }

    #[tokio::test]
    async fn verification_is_idempotent() {
        let v = verifier(Some(good_tx()));
        let first = run(&v, 4).await;
        let second = run(&v, 4).await;
        assert!(first.verified && second.verified);
        assert_eq!(first.amount, second.amount);
    }

    #[tokio::test]
    async fn skips_undecodable_logs_before_the_event() {
        let mut tx = good_tx();
        let noise = Log {
            address: addr(CONTRACT),
            topics: vec![H256::repeat_byte(0x11)],
            data: Bytes::default(),
            ..Default::default()
        };
        let event = subscribed_log(addr(CONTRACT), addr(SUBSCRIBER), 4, 5_000_000);
        tx.receipt.as_mut().unwrap().logs = vec![noise, event];
        let result = run(&verifier(Some(tx)), 4).await;
        assert!(result.verified);
    }
}
