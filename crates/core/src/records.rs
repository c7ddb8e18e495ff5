//! Durable record types: the chain event audit trail, typed domain records
//! and historical price pins.

use alloy::primitives::{Address, B256, U256};
use anchor_chain::{EventKind, ProtocolEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chain event about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChainEvent {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub kind: EventKind,
}

/// Append-only audit row; unique on `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub id: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub event_id: u64,
    pub user: Address,
    pub token: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRecord {
    pub event_id: u64,
    pub user: Address,
    /// Recipient of the withdrawn collateral
    pub to: Address,
    pub token: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    pub event_id: u64,
    pub user: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    pub event_id: u64,
    pub user: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub event_id: u64,
    pub user: Address,
    pub liquidator: Address,
    pub token: Address,
    pub collateral_seized: U256,
    pub debt_covered: U256,
}

/// One typed domain record, referencing its chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainRecord {
    Deposit(DepositRecord),
    Redeem(RedeemRecord),
    Mint(MintRecord),
    Burn(BurnRecord),
    Liquidation(LiquidationRecord),
}

impl DomainRecord {
    /// Build the record for a decoded event persisted under `event_id`.
    pub fn from_event(event_id: u64, event: &ProtocolEvent) -> Self {
        match *event {
            ProtocolEvent::Deposited {
                user,
                token,
                amount,
            } => Self::Deposit(DepositRecord {
                event_id,
                user,
                token,
                amount,
            }),
            ProtocolEvent::Redeemed {
                from,
                to,
                token,
                amount,
            } => Self::Redeem(RedeemRecord {
                event_id,
                user: from,
                to,
                token,
                amount,
            }),
            ProtocolEvent::Minted { user, amount } => Self::Mint(MintRecord {
                event_id,
                user,
                amount,
            }),
            ProtocolEvent::Burned { user, amount } => Self::Burn(BurnRecord {
                event_id,
                user,
                amount,
            }),
            ProtocolEvent::Liquidated {
                user,
                liquidator,
                token,
                collateral_seized,
                debt_covered,
            } => Self::Liquidation(LiquidationRecord {
                event_id,
                user,
                liquidator,
                token,
                collateral_seized,
                debt_covered,
            }),
        }
    }

    pub fn event_id(&self) -> u64 {
        match self {
            Self::Deposit(r) => r.event_id,
            Self::Redeem(r) => r.event_id,
            Self::Mint(r) => r.event_id,
            Self::Burn(r) => r.event_id,
            Self::Liquidation(r) => r.event_id,
        }
    }

    pub fn user(&self) -> Address {
        match self {
            Self::Deposit(r) => r.user,
            Self::Redeem(r) => r.user,
            Self::Mint(r) => r.user,
            Self::Burn(r) => r.user,
            Self::Liquidation(r) => r.user,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Deposit(_) => EventKind::CollateralDeposited,
            Self::Redeem(_) => EventKind::CollateralRedeemed,
            Self::Mint(_) => EventKind::AusdMinted,
            Self::Burn(_) => EventKind::AusdBurned,
            Self::Liquidation(_) => EventKind::Liquidation,
        }
    }
}

/// Immutable USD price of a token at a block, as the feed's decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePin {
    pub token_name: String,
    pub block_number: u64,
    pub price_usd: String,
}
