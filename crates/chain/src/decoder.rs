//! Typed decoding of protocol logs.
//!
//! Indexed fields come from `topics[1..]`, addresses right-aligned in the
//! 32-byte word. Non-indexed numeric fields are read from 32-byte ABI words
//! in `data`.

use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

use crate::events::EventKind;
use crate::log::RawLog;

/// Log decoding errors. All are non-fatal for the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind}: expected {expected} topics, got {got}")]
    InsufficientTopics {
        kind: EventKind,
        expected: usize,
        got: usize,
    },

    #[error("{kind}: expected {expected} data bytes, got {got}")]
    ShortData {
        kind: EventKind,
        expected: usize,
        got: usize,
    },

    #[error("{kind}: signature topic does not match")]
    SignatureMismatch { kind: EventKind },

    #[error("log is missing {0}")]
    MissingMetadata(&'static str),
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Deposited {
        user: Address,
        token: Address,
        amount: U256,
    },
    Redeemed {
        /// Position the collateral was withdrawn from
        from: Address,
        /// Recipient of the withdrawn collateral
        to: Address,
        token: Address,
        amount: U256,
    },
    Minted {
        user: Address,
        amount: U256,
    },
    Burned {
        user: Address,
        amount: U256,
    },
    Liquidated {
        user: Address,
        liquidator: Address,
        token: Address,
        collateral_seized: U256,
        debt_covered: U256,
    },
}

impl ProtocolEvent {
    /// Decode `log` as an event of the given kind.
    pub fn decode(kind: EventKind, log: &RawLog) -> Result<Self, DecodeError> {
        if log.signature() != Some(&kind.topic()) {
            return Err(DecodeError::SignatureMismatch { kind });
        }

        match kind {
            // CollateralDeposited(address indexed user, address indexed token, uint256 indexed amount)
            EventKind::CollateralDeposited => {
                require_topics(kind, log, 4)?;
                Ok(Self::Deposited {
                    user: topic_address(&log.topics[1]),
                    token: topic_address(&log.topics[2]),
                    amount: topic_uint(&log.topics[3]),
                })
            }
            // CollateralRedeemed(address indexed redeemedFrom, address indexed redeemedTo, address indexed token, uint256 amount)
            EventKind::CollateralRedeemed => {
                require_topics(kind, log, 4)?;
                require_data(kind, log, 32)?;
                Ok(Self::Redeemed {
                    from: topic_address(&log.topics[1]),
                    to: topic_address(&log.topics[2]),
                    token: topic_address(&log.topics[3]),
                    amount: data_word(log, 0),
                })
            }
            EventKind::AusdMinted => {
                require_topics(kind, log, 3)?;
                Ok(Self::Minted {
                    user: topic_address(&log.topics[1]),
                    amount: topic_uint(&log.topics[2]),
                })
            }
            EventKind::AusdBurned => {
                require_topics(kind, log, 3)?;
                Ok(Self::Burned {
                    user: topic_address(&log.topics[1]),
                    amount: topic_uint(&log.topics[2]),
                })
            }
            // Liquidation(address indexed user, address indexed liquidator, address indexed token, uint256 collateralSeized, uint256 debtCovered)
            EventKind::Liquidation => {
                require_topics(kind, log, 4)?;
                require_data(kind, log, 64)?;
                Ok(Self::Liquidated {
                    user: topic_address(&log.topics[1]),
                    liquidator: topic_address(&log.topics[2]),
                    token: topic_address(&log.topics[3]),
                    collateral_seized: data_word(log, 0),
                    debt_covered: data_word(log, 1),
                })
            }
        }
    }

    /// The kind this event was decoded as.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Deposited { .. } => EventKind::CollateralDeposited,
            Self::Redeemed { .. } => EventKind::CollateralRedeemed,
            Self::Minted { .. } => EventKind::AusdMinted,
            Self::Burned { .. } => EventKind::AusdBurned,
            Self::Liquidated { .. } => EventKind::Liquidation,
        }
    }

    /// The user whose position this event changes.
    pub fn user(&self) -> Address {
        match self {
            Self::Deposited { user, .. } => *user,
            Self::Redeemed { from, .. } => *from,
            Self::Minted { user, .. } => *user,
            Self::Burned { user, .. } => *user,
            Self::Liquidated { user, .. } => *user,
        }
    }
}

fn require_topics(kind: EventKind, log: &RawLog, expected: usize) -> Result<(), DecodeError> {
    if log.topics.len() < expected {
        return Err(DecodeError::InsufficientTopics {
            kind,
            expected,
            got: log.topics.len(),
        });
    }
    Ok(())
}

fn require_data(kind: EventKind, log: &RawLog, expected: usize) -> Result<(), DecodeError> {
    if log.data.len() < expected {
        return Err(DecodeError::ShortData {
            kind,
            expected,
            got: log.data.len(),
        });
    }
    Ok(())
}

fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

fn topic_uint(topic: &B256) -> U256 {
    U256::from_be_bytes(topic.0)
}

/// Read the `index`th 32-byte word of the log data. Length must be checked first.
fn data_word(log: &RawLog, index: usize) -> U256 {
    let start = index * 32;
    U256::from_be_slice(&log.data[start..start + 32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    fn address_topic(addr: Address) -> B256 {
        addr.into_word()
    }

    fn uint_topic(value: u64) -> B256 {
        B256::from(U256::from(value).to_be_bytes::<32>())
    }

    fn raw(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xee),
            block_number: 100,
            tx_hash: B256::repeat_byte(0xaa),
            log_index: 3,
            topics,
            data: Bytes::from(data),
        }
    }

    fn words(values: &[u64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| U256::from(*v).to_be_bytes::<32>())
            .collect()
    }

    #[test]
    fn test_decode_deposit() {
        let user = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        let log = raw(
            vec![
                EventKind::CollateralDeposited.topic(),
                address_topic(user),
                address_topic(token),
                uint_topic(1_000),
            ],
            vec![],
        );

        let event = ProtocolEvent::decode(EventKind::CollateralDeposited, &log).unwrap();
        assert_eq!(
            event,
            ProtocolEvent::Deposited {
                user,
                token,
                amount: U256::from(1_000u64)
            }
        );
        assert_eq!(event.user(), user);
    }

    #[test]
    fn test_decode_redeem_user_is_redeemed_from() {
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(9);
        let token = Address::repeat_byte(2);
        let log = raw(
            vec![
                EventKind::CollateralRedeemed.topic(),
                address_topic(from),
                address_topic(to),
                address_topic(token),
            ],
            words(&[42]),
        );

        let event = ProtocolEvent::decode(EventKind::CollateralRedeemed, &log).unwrap();
        assert_eq!(event.user(), from);
        assert_eq!(
            event,
            ProtocolEvent::Redeemed {
                from,
                to,
                token,
                amount: U256::from(42u64)
            }
        );
    }

    #[test]
    fn test_decode_mint_and_burn() {
        let user = Address::repeat_byte(7);
        let mint = raw(
            vec![EventKind::AusdMinted.topic(), address_topic(user), uint_topic(5)],
            vec![],
        );
        let burn = raw(
            vec![EventKind::AusdBurned.topic(), address_topic(user), uint_topic(6)],
            vec![],
        );

        assert_eq!(
            ProtocolEvent::decode(EventKind::AusdMinted, &mint).unwrap(),
            ProtocolEvent::Minted {
                user,
                amount: U256::from(5u64)
            }
        );
        assert_eq!(
            ProtocolEvent::decode(EventKind::AusdBurned, &burn).unwrap(),
            ProtocolEvent::Burned {
                user,
                amount: U256::from(6u64)
            }
        );
    }

    #[test]
    fn test_decode_liquidation_data_fields() {
        let user = Address::repeat_byte(1);
        let liquidator = Address::repeat_byte(3);
        let token = Address::repeat_byte(2);
        let log = raw(
            vec![
                EventKind::Liquidation.topic(),
                address_topic(user),
                address_topic(liquidator),
                address_topic(token),
            ],
            words(&[11, 22]),
        );

        let event = ProtocolEvent::decode(EventKind::Liquidation, &log).unwrap();
        assert_eq!(
            event,
            ProtocolEvent::Liquidated {
                user,
                liquidator,
                token,
                collateral_seized: U256::from(11u64),
                debt_covered: U256::from(22u64),
            }
        );
        assert_eq!(event.kind(), EventKind::Liquidation);
    }

    #[test]
    fn test_insufficient_topics() {
        let log = raw(vec![EventKind::AusdMinted.topic(), uint_topic(1)], vec![]);
        assert_eq!(
            ProtocolEvent::decode(EventKind::AusdMinted, &log),
            Err(DecodeError::InsufficientTopics {
                kind: EventKind::AusdMinted,
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn test_short_liquidation_data() {
        let log = raw(
            vec![
                EventKind::Liquidation.topic(),
                uint_topic(1),
                uint_topic(2),
                uint_topic(3),
            ],
            words(&[11]),
        );
        assert!(matches!(
            ProtocolEvent::decode(EventKind::Liquidation, &log),
            Err(DecodeError::ShortData { expected: 64, got: 32, .. })
        ));
    }

    #[test]
    fn test_signature_mismatch() {
        let log = raw(
            vec![EventKind::AusdBurned.topic(), uint_topic(1), uint_topic(2)],
            vec![],
        );
        assert_eq!(
            ProtocolEvent::decode(EventKind::AusdMinted, &log),
            Err(DecodeError::SignatureMismatch {
                kind: EventKind::AusdMinted
            })
        );
    }
}
