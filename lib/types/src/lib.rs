// ============ Tidepool Types ============
// Shared identifiers, configuration and the error taxonomy used by every
// Tidepool component.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tidepool_math::MathError;

pub use tidepool_math::{BPS_DENOMINATOR, PRECISION};

// ============ Defaults ============

pub const MINIMUM_LIQUIDITY: u128 = 1000;
pub const DEFAULT_MAX_FEE_BPS: u16 = 1000; // 10%
pub const DEFAULT_EMISSION_PERIOD_SECS: u64 = 30 * 24 * 60 * 60; // 30 days

// ============ Identifiers ============

fn label_hash(domain: &[u8], label: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(label.as_bytes());
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn parse_hex32(s: &str) -> std::result::Result<[u8; 32], String> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

/// Holder of assets and pool shares. Serialized as a 64-char hex string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Sink for permanently locked minimum liquidity.
    pub const BURN: AccountId = AccountId([0u8; 32]);

    pub fn from_label(label: &str) -> Self {
        Self(label_hash(b"tidepool/account/", label))
    }
}

impl TryFrom<String> for AccountId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        parse_hex32(&s).map(Self)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        hex::encode(id.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// External fungible asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    pub fn from_label(label: &str) -> Self {
        Self(label_hash(b"tidepool/asset/", label))
    }
}

impl TryFrom<String> for AssetId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        parse_hex32(&s).map(Self)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        hex::encode(id.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VaultId(pub u64);

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vault#{}", self.0)
    }
}

// ============ Configuration ============

/// What a vault does with emission that falls in an interval with no locked shares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleRewardPolicy {
    /// Keep the emission pending; it is distributed once shares are locked.
    #[default]
    CarryForward,
    /// Drop the emission; it stays in custody and is never distributed.
    Forfeit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Seconds over which a vault's seeded reward is emitted linearly
    pub emission_period_secs: u64,
    pub idle_policy: IdleRewardPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            emission_period_secs: DEFAULT_EMISSION_PERIOD_SECS,
            idle_policy: IdleRewardPolicy::CarryForward,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Account that holds pooled reserves and vault rewards at the asset bank
    pub custodian: AccountId,
    /// Shares minted to [`AccountId::BURN`] when a pool is created
    pub minimum_liquidity: u128,
    pub max_fee_bps: u16,
    pub vault: VaultConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            custodian: AccountId::from_label("tidepool-custodian"),
            minimum_liquidity: MINIMUM_LIQUIDITY,
            max_fee_bps: DEFAULT_MAX_FEE_BPS,
            vault: VaultConfig::default(),
        }
    }
}

// ============ Errors ============

/// Failure reported by the external asset collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("insufficient allowance for asset {asset}: have {available}, need {required}")]
    InsufficientAllowance {
        asset: AssetId,
        available: u128,
        required: u128,
    },

    #[error("insufficient funds of asset {asset}: have {available}, need {required}")]
    InsufficientFunds {
        asset: AssetId,
        available: u128,
        required: u128,
    },

    #[error("asset transfer rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("asset does not belong to the pool or both pool assets are identical")]
    InvalidAsset,

    #[error("pool {0} not found")]
    PoolNotFound(PoolId),

    #[error("insufficient liquidity")]
    InsufficientLiquidity,

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("insufficient locked shares: locked {locked}, requested {requested}")]
    InsufficientLocked { locked: u128, requested: u128 },

    #[error("shares are locked: unlocked {unlocked}, requested {requested}")]
    Locked { unlocked: u128, requested: u128 },

    #[error("lock of {lock} exceeds balance {balance}")]
    LockExceedsBalance { lock: u128, balance: u128 },

    #[error("vault {vault} already exists for {pool}")]
    VaultExists { pool: PoolId, vault: VaultId },

    #[error("vault {vault} not found for {pool}")]
    VaultNotFound { pool: PoolId, vault: VaultId },

    #[error("fee of {fee_bps} bps exceeds maximum {max_bps} bps")]
    InvalidFee { fee_bps: u16, max_bps: u16 },

    #[error("swap would produce zero output")]
    InsufficientOutputAmount,

    #[error("operator is not approved for the holder")]
    NotApproved,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("asset settlement failed: {0}")]
    Transfer(#[from] BankError),
}

impl From<MathError> for ExchangeError {
    fn from(err: MathError) -> Self {
        match err {
            MathError::ZeroInput => ExchangeError::ZeroAmount,
            MathError::Overflow => ExchangeError::Overflow,
            MathError::InvalidFee => ExchangeError::InvalidFee {
                fee_bps: u16::MAX,
                max_bps: (BPS_DENOMINATOR - 1) as u16,
            },
            // Empty reserves or supply, or a deposit the reserves cannot price
            MathError::InsufficientLiquidity
            | MathError::InvalidAmounts
            | MathError::DivisionByZero => ExchangeError::InsufficientLiquidity,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

// ============ Tests ============
