// ============ Exchange ============
// Single state container wiring the registry, ledger and vaults to an asset
// bank. Every mutating call commits internal state first and settles with the
// bank last; any failure restores the entries captured before the call.

use crate::bank::{AssetBank, Transfer};
use crate::checkpoint::{Checkpoint, Touched};
use crate::curve::Curve;
use crate::ledger::{OwnershipLedger, Position};
use crate::registry::{LiquidityReceipt, PairCreated, Pool, PoolRegistry, SwapReceipt, Withdrawal};
use crate::vault::{RewardVaults, Stake, Vault};
use sha2::{Digest, Sha256};
use tidepool_types::{AccountId, AssetId, ExchangeConfig, ExchangeError, PoolId, Result, VaultId};
use tracing::{debug, info, warn};

/// Mutable view handed to an operation body.
struct Books<'a> {
    config: &'a ExchangeConfig,
    registry: &'a mut PoolRegistry,
    ledger: &'a mut OwnershipLedger,
    vaults: &'a mut RewardVaults,
}

pub struct Exchange<B> {
    config: ExchangeConfig,
    registry: PoolRegistry,
    ledger: OwnershipLedger,
    vaults: RewardVaults,
    bank: B,
}

impl<B: AssetBank> Exchange<B> {
    pub fn new(bank: B) -> Self {
        Self::with_config(ExchangeConfig::default(), bank)
    }

    pub fn with_config(config: ExchangeConfig, bank: B) -> Self {
        let vaults = RewardVaults::new(config.vault.clone());
        Self {
            config,
            registry: PoolRegistry::new(),
            ledger: OwnershipLedger::new(),
            vaults,
            bank,
        }
    }

    // ============ Atomic Execution ============

    fn atomically<T>(
        &mut self,
        op: &'static str,
        touched: Touched,
        body: impl FnOnce(&mut Books<'_>) -> Result<(T, Vec<Transfer>)>,
    ) -> Result<T> {
        let checkpoint = Checkpoint::capture(&self.registry, &self.ledger, &self.vaults, &touched);

        let mut books = Books {
            config: &self.config,
            registry: &mut self.registry,
            ledger: &mut self.ledger,
            vaults: &mut self.vaults,
        };
        let outcome = match body(&mut books) {
            Ok((value, transfers)) => self
                .bank
                .settle(&self.config.custodian, &transfers)
                .map(|()| value)
                .map_err(|err| {
                    warn!(op, %err, "settlement failed, rolling back");
                    ExchangeError::from(err)
                }),
            Err(err) => {
                debug!(op, %err, "rejected");
                Err(err)
            }
        };

        if outcome.is_err() {
            checkpoint.restore(&mut self.registry, &mut self.ledger, &mut self.vaults);
        }
        outcome
    }

    // ============ Pools ============

    /// Creates a pool seeded by `caller` and mints its shares to `owner`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_pair(
        &mut self,
        caller: &AccountId,
        owner: &AccountId,
        asset_a: AssetId,
        asset_b: AssetId,
        amount_a: u128,
        amount_b: u128,
        curve: Curve,
        fee_bps: u16,
        data: &[u8],
    ) -> Result<PairCreated> {
        let id = self.registry.next_pool_id();
        let touched = Touched::default()
            .pool(id)
            .position(*owner, id)
            .position(AccountId::BURN, id);

        let created = self.atomically("create_pair", touched, |books| {
            let created = books.registry.create_pair(
                books.ledger,
                books.config,
                owner,
                asset_a,
                asset_b,
                amount_a,
                amount_b,
                curve,
                fee_bps,
            )?;
            let transfers = vec![
                Transfer::Pull { asset: asset_a, from: *caller, amount: amount_a },
                Transfer::Pull { asset: asset_b, from: *caller, amount: amount_b },
            ];
            Ok((created, transfers))
        })?;

        info!(
            pool = %created.pool_id,
            %owner,
            shares = created.shares,
            curve = curve.tag(),
            fee_bps,
            data_len = data.len(),
            "pair created"
        );
        Ok(created)
    }

    /// Swaps `amount_in` of `asset_in` from `caller`; the output goes to `recipient`.
    pub fn swap(
        &mut self,
        caller: &AccountId,
        recipient: &AccountId,
        pool: PoolId,
        asset_in: &AssetId,
        amount_in: u128,
    ) -> Result<u128> {
        let receipt = self.atomically("swap", Touched::default().pool(pool), |books| {
            let receipt = books.registry.swap(pool, asset_in, amount_in)?;
            let transfers = vec![
                Transfer::Pull { asset: receipt.asset_in, from: *caller, amount: receipt.amount_in },
                Transfer::Push { asset: receipt.asset_out, to: *recipient, amount: receipt.amount_out },
            ];
            Ok((receipt, transfers))
        })?;

        info!(%pool, %caller, %recipient, amount_in, amount_out = receipt.amount_out, "swap");
        Ok(receipt.amount_out)
    }

    /// Deposits up to (`amount_a`, `amount_b`); only the consumed amounts are pulled.
    pub fn add_liquidity(
        &mut self,
        caller: &AccountId,
        recipient: &AccountId,
        pool: PoolId,
        amount_a: u128,
        amount_b: u128,
        data: &[u8],
    ) -> Result<LiquidityReceipt> {
        let touched = Touched::default().pool(pool).position(*recipient, pool);
        let receipt = self.atomically("add_liquidity", touched, |books| {
            let receipt = books
                .registry
                .add_liquidity(books.ledger, recipient, pool, amount_a, amount_b)?;
            let target = books.registry.pool(pool)?;
            let transfers = vec![
                Transfer::Pull { asset: target.asset_a, from: *caller, amount: receipt.amount_a },
                Transfer::Pull { asset: target.asset_b, from: *caller, amount: receipt.amount_b },
            ];
            Ok((receipt, transfers))
        })?;

        info!(
            %pool,
            %recipient,
            shares = receipt.shares,
            amount_a = receipt.amount_a,
            amount_b = receipt.amount_b,
            data_len = data.len(),
            "liquidity added"
        );
        Ok(receipt)
    }

    /// Burns `shares` from the caller's unlocked balance and pays the reserves out.
    pub fn remove_liquidity(
        &mut self,
        caller: &AccountId,
        recipient: &AccountId,
        pool: PoolId,
        shares: u128,
    ) -> Result<Withdrawal> {
        let touched = Touched::default().pool(pool).position(*caller, pool);
        let withdrawal = self.atomically("remove_liquidity", touched, |books| {
            let withdrawal = books.registry.remove_liquidity(books.ledger, caller, pool, shares)?;
            let target = books.registry.pool(pool)?;
            let transfers = vec![
                Transfer::Push { asset: target.asset_a, to: *recipient, amount: withdrawal.amount_a },
                Transfer::Push { asset: target.asset_b, to: *recipient, amount: withdrawal.amount_b },
            ];
            Ok((withdrawal, transfers))
        })?;

        info!(
            %pool,
            %caller,
            %recipient,
            shares,
            amount_a = withdrawal.amount_a,
            amount_b = withdrawal.amount_b,
            "liquidity removed"
        );
        Ok(withdrawal)
    }

    // ============ Shares ============

    pub fn transfer(&mut self, caller: &AccountId, to: &AccountId, pool: PoolId, amount: u128) -> Result<()> {
        self.ledger.transfer(caller, to, pool, amount)?;
        info!(%pool, from = %caller, %to, amount, "shares transferred");
        Ok(())
    }

    pub fn set_approval_for_all(&mut self, owner: &AccountId, operator: &AccountId, approved: bool) {
        self.ledger.set_approval_for_all(owner, operator, approved);
        info!(%owner, %operator, approved, "approval for all");
    }

    pub fn transfer_from(
        &mut self,
        operator: &AccountId,
        from: &AccountId,
        to: &AccountId,
        pool: PoolId,
        amount: u128,
    ) -> Result<()> {
        self.ledger.transfer_from(operator, from, to, pool, amount)?;
        info!(%pool, %operator, %from, %to, amount, "shares transferred");
        Ok(())
    }

    pub fn batch_transfer_from(
        &mut self,
        operator: &AccountId,
        from: &AccountId,
        to: &AccountId,
        entries: &[(PoolId, u128)],
    ) -> Result<()> {
        self.ledger.batch_transfer_from(operator, from, to, entries)?;
        info!(%operator, %from, %to, entries = entries.len(), "batch transferred");
        Ok(())
    }

    // ============ Vaults ============

    /// Opens a vault on `pool`, funded with `reward_amount` pulled from `funder`.
    pub fn create_vault(
        &mut self,
        funder: &AccountId,
        pool: PoolId,
        vault: VaultId,
        reward_asset: AssetId,
        reward_amount: u128,
        now: u64,
    ) -> Result<()> {
        let touched = Touched::default().vault(pool, vault);
        self.atomically("create_vault", touched, |books| {
            books.registry.pool(pool)?;
            books
                .vaults
                .create(pool, vault, reward_asset, reward_amount, now)?;
            let transfers = vec![Transfer::Pull {
                asset: reward_asset,
                from: *funder,
                amount: reward_amount,
            }];
            Ok(((), transfers))
        })?;

        info!(%pool, %vault, %funder, reward_amount, now, "vault created");
        Ok(())
    }

    /// Locks `shares` of the depositor's position in the vault.
    pub fn deposit(
        &mut self,
        depositor: &AccountId,
        pool: PoolId,
        vault: VaultId,
        shares: u128,
        now: u64,
    ) -> Result<()> {
        let touched = Touched::default()
            .stake(pool, vault, *depositor)
            .position(*depositor, pool);
        self.atomically("deposit", touched, |books| {
            books
                .vaults
                .deposit(books.ledger, depositor, pool, vault, shares, now)?;
            Ok(((), Vec::new()))
        })?;

        info!(%pool, %vault, %depositor, shares, now, "deposit");
        Ok(())
    }

    /// Unlocks `shares` and pays every reward owed to `recipient`. Returns the reward paid.
    pub fn withdraw(
        &mut self,
        depositor: &AccountId,
        pool: PoolId,
        vault: VaultId,
        shares: u128,
        recipient: &AccountId,
        now: u64,
    ) -> Result<u128> {
        let touched = Touched::default()
            .stake(pool, vault, *depositor)
            .position(*depositor, pool);
        let reward = self.atomically("withdraw", touched, |books| {
            let payout = books
                .vaults
                .withdraw(books.ledger, depositor, pool, vault, shares, now)?;
            Ok((payout.amount, payout_transfers(payout.asset, recipient, payout.amount)))
        })?;

        info!(%pool, %vault, %depositor, %recipient, shares, reward, now, "withdraw");
        Ok(reward)
    }

    /// Pays accrued reward to `recipient` without unlocking anything.
    pub fn claim(
        &mut self,
        depositor: &AccountId,
        pool: PoolId,
        vault: VaultId,
        recipient: &AccountId,
        now: u64,
    ) -> Result<u128> {
        let touched = Touched::default().stake(pool, vault, *depositor);
        let reward = self.atomically("claim", touched, |books| {
            let payout = books.vaults.claim(books.ledger, depositor, pool, vault, now)?;
            Ok((payout.amount, payout_transfers(payout.asset, recipient, payout.amount)))
        })?;

        info!(%pool, %vault, %depositor, %recipient, reward, now, "claim");
        Ok(reward)
    }

    // ============ Queries ============

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn pool(&self, id: PoolId) -> Result<&Pool> {
        self.registry.pool(id)
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.registry.pools()
    }

    pub fn pool_count(&self) -> usize {
        self.registry.pool_count()
    }

    pub fn quote_swap(&self, pool: PoolId, asset_in: &AssetId, amount_in: u128) -> Result<SwapReceipt> {
        self.registry.quote_swap(pool, asset_in, amount_in)
    }

    pub fn position(&self, owner: &AccountId, pool: PoolId) -> Position {
        self.ledger.position(owner, pool)
    }

    pub fn balance_of(&self, owner: &AccountId, pool: PoolId) -> u128 {
        self.ledger.balance_of(owner, pool)
    }

    pub fn locked_balance_of(&self, owner: &AccountId, pool: PoolId) -> u128 {
        self.ledger.locked_balance_of(owner, pool)
    }

    pub fn balance_of_batch(&self, queries: &[(AccountId, PoolId)]) -> Vec<u128> {
        self.ledger.balance_of_batch(queries)
    }

    pub fn total_supply(&self, pool: PoolId) -> u128 {
        self.ledger.total_supply(pool)
    }

    pub fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool {
        self.ledger.is_approved_for_all(owner, operator)
    }

    pub fn vault(&self, pool: PoolId, vault: VaultId) -> Result<&Vault> {
        self.vaults.vault(pool, vault)
    }

    pub fn stake(&self, pool: PoolId, vault: VaultId, depositor: &AccountId) -> Stake {
        self.vaults.stake(pool, vault, depositor)
    }

    pub fn pending_reward(&self, depositor: &AccountId, pool: PoolId, vault: VaultId, now: u64) -> Result<u128> {
        self.vaults.pending_reward(pool, vault, depositor, now)
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    pub fn vaults(&self) -> &RewardVaults {
        &self.vaults
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    /// SHA-256 over pools, positions, approvals and vaults in key order.
    pub fn state_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        self.registry.digest_into(&mut hasher);
        self.ledger.digest_into(&mut hasher);
        self.vaults.digest_into(&mut hasher);
        hasher.finalize().into()
    }
}

fn payout_transfers(asset: AssetId, recipient: &AccountId, amount: u128) -> Vec<Transfer> {
    if amount == 0 {
        return Vec::new();
    }
    vec![Transfer::Push { asset, to: *recipient, amount }]
}
