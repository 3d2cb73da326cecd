// ============ Scenario Format ============
// A scenario is an optional exchange config plus an ordered list of steps.
// Accounts and assets are referenced by label; amounts are decimal strings
// that may carry an exponent ("10e18").

use serde::{Deserialize, Deserializer};
use tidepool_core::{
    AccountId, AssetId, Curve, Exchange, ExchangeConfig, ExchangeError, MemoryBank, PoolId, VaultId,
};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: ExchangeConfig,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// The step must be rejected for the scenario to pass
    #[serde(default)]
    pub expect_failure: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Mints `amount` of `asset` to `account` and approves the custodian for all of it.
    Fund {
        account: String,
        asset: String,
        #[serde(deserialize_with = "amount")]
        amount: u128,
    },
    CreatePair {
        caller: String,
        owner: Option<String>,
        asset_a: String,
        asset_b: String,
        #[serde(deserialize_with = "amount")]
        amount_a: u128,
        #[serde(deserialize_with = "amount")]
        amount_b: u128,
        #[serde(default)]
        curve: Curve,
        #[serde(default)]
        fee_bps: u16,
    },
    Swap {
        caller: String,
        recipient: Option<String>,
        pool: u64,
        asset_in: String,
        #[serde(deserialize_with = "amount")]
        amount_in: u128,
    },
    AddLiquidity {
        caller: String,
        recipient: Option<String>,
        pool: u64,
        #[serde(deserialize_with = "amount")]
        amount_a: u128,
        #[serde(deserialize_with = "amount")]
        amount_b: u128,
    },
    RemoveLiquidity {
        caller: String,
        recipient: Option<String>,
        pool: u64,
        #[serde(deserialize_with = "amount")]
        shares: u128,
    },
    Transfer {
        from: String,
        to: String,
        pool: u64,
        #[serde(deserialize_with = "amount")]
        amount: u128,
    },
    CreateVault {
        funder: String,
        pool: u64,
        vault: u64,
        reward_asset: String,
        #[serde(deserialize_with = "amount")]
        reward_amount: u128,
        at: u64,
    },
    Deposit {
        depositor: String,
        pool: u64,
        vault: u64,
        #[serde(deserialize_with = "amount")]
        shares: u128,
        at: u64,
    },
    Withdraw {
        depositor: String,
        pool: u64,
        vault: u64,
        #[serde(deserialize_with = "amount")]
        shares: u128,
        recipient: Option<String>,
        at: u64,
    },
    Claim {
        depositor: String,
        pool: u64,
        vault: u64,
        recipient: Option<String>,
        at: u64,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Fund { .. } => "fund",
            Action::CreatePair { .. } => "create_pair",
            Action::Swap { .. } => "swap",
            Action::AddLiquidity { .. } => "add_liquidity",
            Action::RemoveLiquidity { .. } => "remove_liquidity",
            Action::Transfer { .. } => "transfer",
            Action::CreateVault { .. } => "create_vault",
            Action::Deposit { .. } => "deposit",
            Action::Withdraw { .. } => "withdraw",
            Action::Claim { .. } => "claim",
        }
    }
}

// ============ Amounts ============

/// Parses "1500", "10e18" or "2.5e18" into base units.
pub fn parse_amount(text: &str) -> Result<u128, String> {
    let text = text.trim().replace('_', "");
    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<u32>().map_err(|e| format!("bad exponent in {text:?}: {e}"))?),
        None => (text.as_str(), 0),
    };
    let (whole, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if frac.len() as u32 > exponent {
        return Err(format!("{text:?} is not a whole number of base units"));
    }

    let digits = format!("{whole}{frac}");
    let base = digits
        .parse::<u128>()
        .map_err(|e| format!("bad amount {text:?}: {e}"))?;
    10u128
        .checked_pow(exponent - frac.len() as u32)
        .and_then(|scale| base.checked_mul(scale))
        .ok_or_else(|| format!("amount {text:?} overflows u128"))
}

fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_amount(&text).map_err(serde::de::Error::custom)
}

// ============ Runner ============

fn account(label: &str) -> AccountId {
    AccountId::from_label(label)
}

fn asset(label: &str) -> AssetId {
    AssetId::from_label(label)
}

fn or_self(recipient: &Option<String>, caller: &str) -> AccountId {
    account(recipient.as_deref().unwrap_or(caller))
}

pub struct Runner {
    pub exchange: Exchange<MemoryBank>,
}

impl Runner {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            exchange: Exchange::with_config(config, MemoryBank::new()),
        }
    }

    /// Applies one action, returning a one-line description of its effect.
    pub fn apply(&mut self, action: &Action) -> Result<String, ExchangeError> {
        let ex = &mut self.exchange;
        match action {
            Action::Fund { account: who, asset: what, amount } => {
                let custodian = ex.config().custodian;
                let bank = ex.bank_mut();
                bank.mint(&asset(what), &account(who), *amount)?;
                bank.approve(&asset(what), &account(who), &custodian, u128::MAX);
                Ok(format!("{who} funded with {amount} {what}"))
            }
            Action::CreatePair { caller, owner, asset_a, asset_b, amount_a, amount_b, curve, fee_bps } => {
                let created = ex.create_pair(
                    &account(caller),
                    &or_self(owner, caller),
                    asset(asset_a),
                    asset(asset_b),
                    *amount_a,
                    *amount_b,
                    *curve,
                    *fee_bps,
                    &[],
                )?;
                Ok(format!(
                    "{} created ({asset_a}/{asset_b}), {} shares minted",
                    created.pool_id, created.shares
                ))
            }
            Action::Swap { caller, recipient, pool, asset_in, amount_in } => {
                let out = ex.swap(
                    &account(caller),
                    &or_self(recipient, caller),
                    PoolId(*pool),
                    &asset(asset_in),
                    *amount_in,
                )?;
                Ok(format!("swapped {amount_in} {asset_in} for {out}"))
            }
            Action::AddLiquidity { caller, recipient, pool, amount_a, amount_b } => {
                let receipt = ex.add_liquidity(
                    &account(caller),
                    &or_self(recipient, caller),
                    PoolId(*pool),
                    *amount_a,
                    *amount_b,
                    &[],
                )?;
                Ok(format!(
                    "added {} / {} for {} shares",
                    receipt.amount_a, receipt.amount_b, receipt.shares
                ))
            }
            Action::RemoveLiquidity { caller, recipient, pool, shares } => {
                let out = ex.remove_liquidity(
                    &account(caller),
                    &or_self(recipient, caller),
                    PoolId(*pool),
                    *shares,
                )?;
                Ok(format!(
                    "burned {shares} shares for {} / {}",
                    out.amount_a, out.amount_b
                ))
            }
            Action::Transfer { from, to, pool, amount } => {
                ex.transfer(&account(from), &account(to), PoolId(*pool), *amount)?;
                Ok(format!("{from} sent {amount} shares of pool#{pool} to {to}"))
            }
            Action::CreateVault { funder, pool, vault, reward_asset, reward_amount, at } => {
                ex.create_vault(
                    &account(funder),
                    PoolId(*pool),
                    VaultId(*vault),
                    asset(reward_asset),
                    *reward_amount,
                    *at,
                )?;
                Ok(format!("vault#{vault} on pool#{pool} seeded with {reward_amount} {reward_asset}"))
            }
            Action::Deposit { depositor, pool, vault, shares, at } => {
                ex.deposit(&account(depositor), PoolId(*pool), VaultId(*vault), *shares, *at)?;
                Ok(format!("{depositor} locked {shares} shares in vault#{vault}"))
            }
            Action::Withdraw { depositor, pool, vault, shares, recipient, at } => {
                let reward = ex.withdraw(
                    &account(depositor),
                    PoolId(*pool),
                    VaultId(*vault),
                    *shares,
                    &or_self(recipient, depositor),
                    *at,
                )?;
                Ok(format!("{depositor} unlocked {shares} shares, reward {reward}"))
            }
            Action::Claim { depositor, pool, vault, recipient, at } => {
                let reward = ex.claim(
                    &account(depositor),
                    PoolId(*pool),
                    VaultId(*vault),
                    &or_self(recipient, depositor),
                    *at,
                )?;
                Ok(format!("{depositor} claimed {reward}"))
            }
        }
    }
}
