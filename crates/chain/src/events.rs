//! Protocol event kinds and signatures.
//!
//! The engine contract emits exactly five events the indexer understands.
//! Each kind maps to the Keccak256 hash of its canonical signature, which is
//! what appears in `topics[0]` of every emitted log.

use alloy::primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

/// The closed set of protocol events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Collateral deposited into the engine
    CollateralDeposited,
    /// Collateral withdrawn from the engine
    CollateralRedeemed,
    /// Stablecoin minted against collateral
    AusdMinted,
    /// Stablecoin burned to repay debt
    AusdBurned,
    /// Under-collateralized position liquidated
    Liquidation,
}

impl EventKind {
    /// All known kinds, in signature-table order.
    pub const ALL: [EventKind; 5] = [
        Self::CollateralDeposited,
        Self::CollateralRedeemed,
        Self::AusdMinted,
        Self::AusdBurned,
        Self::Liquidation,
    ];

    /// Event name as declared in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CollateralDeposited => "CollateralDeposited",
            Self::CollateralRedeemed => "CollateralRedeemed",
            Self::AusdMinted => "AUSDMinted",
            Self::AusdBurned => "AUSDBurned",
            Self::Liquidation => "Liquidation",
        }
    }

    /// Canonical signature string used for the topic hash.
    pub fn signature(&self) -> &'static str {
        match self {
            // CollateralDeposited(address indexed user, address indexed token, uint256 indexed amount)
            Self::CollateralDeposited => "CollateralDeposited(address,address,uint256)",
            // CollateralRedeemed(address indexed redeemedFrom, address indexed redeemedTo, address indexed token, uint256 amount)
            Self::CollateralRedeemed => "CollateralRedeemed(address,address,address,uint256)",
            // AUSDMinted(address indexed to, uint256 indexed amount)
            Self::AusdMinted => "AUSDMinted(address,uint256)",
            // AUSDBurned(address indexed from, uint256 indexed amount)
            Self::AusdBurned => "AUSDBurned(address,uint256)",
            // Liquidation(address indexed user, address indexed liquidator, address indexed token, uint256 collateralSeized, uint256 debtCovered)
            Self::Liquidation => "Liquidation(address,address,address,uint256,uint256)",
        }
    }

    /// Keccak256 hash of the canonical signature.
    pub fn topic(&self) -> B256 {
        keccak256(self.signature())
    }

    /// Match a log's first topic against the signature table.
    pub fn from_topic(topic: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == *topic)
    }

    /// Look up a kind by its ABI event name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Topic hashes for every known event, for log filters.
pub fn all_topics() -> Vec<B256> {
    EventKind::ALL.iter().map(EventKind::topic).collect()
}
