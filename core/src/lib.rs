//! Tidepool exchange engine: independent trading pools priced by pluggable
//! curves, a multi-pool share ledger with vault locks, and reward vaults that
//! pay time-weighted emissions to locked shares.

pub mod bank;
mod checkpoint;
pub mod curve;
pub mod exchange;
pub mod ledger;
pub mod registry;
pub mod vault;

pub use bank::{AssetBank, MemoryBank, Transfer};
pub use curve::{ConstantProduct, ConstantSum, Curve, MintQuote, Reserves, SwapCurve};
pub use exchange::Exchange;
pub use ledger::{OwnershipLedger, Position};
pub use registry::{LiquidityReceipt, PairCreated, Pool, PoolRegistry, Side, SwapReceipt, Withdrawal};
pub use vault::{RewardPayout, RewardVaults, Stake, Vault};

pub use tidepool_types as types;
pub use tidepool_types::{
    AccountId, AssetId, BankError, ExchangeConfig, ExchangeError, IdleRewardPolicy, PoolId, Result,
    VaultConfig, VaultId,
};
