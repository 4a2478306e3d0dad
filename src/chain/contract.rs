use ethers::abi::RawLog;
use ethers::contract::{EthLogDecode, abigen};
use ethers::types::{Address, Log, U256};

// Minimal binding for the subscription contract: the keeper only submits
// charges, and verification only decodes the event emitted at initial
// subscription time.
abigen!(
    SubscriptionVault,
    r#"[
        function charge(address subscriber, uint256 planId)
        event Subscribed(address indexed subscriber, uint256 planId, address token, uint256 amount)
    ]"#
);

/// Typed decode of one receipt log. Logs emitted by other contracts and
/// contract logs that are not the subscribed event are explicit cases, not
/// swallowed decode errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLog {
    Subscribed {
        subscriber: Address,
        plan_id: U256,
        token: Address,
        amount: U256,
    },
    Unrelated,
    Undecodable,
}

pub fn decode_subscription_log(contract_address: Address, log: &Log) -> DecodedLog {
    if log.address != contract_address {
        return DecodedLog::Unrelated;
    }
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    match SubscribedFilter::decode_log(&raw) {
        Ok(event) => DecodedLog::Subscribed {
            subscriber: event.subscriber,
            plan_id: event.plan_id,
            token: event.token,
            amount: event.amount,
        },
        Err(_) => DecodedLog::Undecodable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;
    use ethers::contract::EthEvent;
    use ethers::types::{Bytes, H256};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    pub fn subscribed_log(
        emitter: Address,
        subscriber: Address,
        plan_id: u64,
        token: Address,
        amount: u128,
    ) -> Log {
        let mut subscriber_topic = [0u8; 32];
        subscriber_topic[12..].copy_from_slice(subscriber.as_bytes());
        Log {
            address: emitter,
            topics: vec![SubscribedFilter::signature(), H256::from(subscriber_topic)],
            data: Bytes::from(ethers::abi::encode(&[
                Token::Uint(U256::from(plan_id)),
                Token::Address(token),
                Token::Uint(U256::from(amount)),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_subscribed_event() {
        let contract = addr(1);
        let log = subscribed_log(contract, addr(2), 7, addr(3), 5_000_000);
        assert_eq!(
            decode_subscription_log(contract, &log),
            DecodedLog::Subscribed {
                subscriber: addr(2),
                plan_id: U256::from(7),
                token: addr(3),
                amount: U256::from(5_000_000u64),
            }
        );
    }

    #[test]
    fn log_from_other_contract_is_unrelated() {
        let log = subscribed_log(addr(9), addr(2), 7, addr(3), 1);
        assert_eq!(decode_subscription_log(addr(1), &log), DecodedLog::Unrelated);
    }

    #[test]
    fn foreign_event_from_contract_is_undecodable() {
        let contract = addr(1);
        let log = Log {
            address: contract,
            topics: vec![H256::repeat_byte(0x11)],
            data: Bytes::default(),
            ..Default::default()
        };
        assert_eq!(decode_subscription_log(contract, &log), DecodedLog::Undecodable);
    }
}
