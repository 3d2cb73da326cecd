// ============ Checkpoints ============
// Saved copies of exactly the entries an operation may touch, so a failure
// at any step (including external settlement) restores them all.

use crate::ledger::{OwnershipLedger, Position};
use crate::registry::{Pool, PoolRegistry};
use crate::vault::{RewardVaults, Stake, Vault};
use tidepool_types::{AccountId, PoolId, VaultId};

/// Keys an operation declares before it runs.
#[derive(Debug, Default)]
pub(crate) struct Touched {
    pools: Vec<PoolId>,
    positions: Vec<(AccountId, PoolId)>,
    vaults: Vec<(PoolId, VaultId)>,
    stakes: Vec<(PoolId, VaultId, AccountId)>,
}

impl Touched {
    pub fn pool(mut self, pool: PoolId) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn position(mut self, owner: AccountId, pool: PoolId) -> Self {
        self.positions.push((owner, pool));
        self
    }

    pub fn stake(mut self, pool: PoolId, vault: VaultId, depositor: AccountId) -> Self {
        self.vaults.push((pool, vault));
        self.stakes.push((pool, vault, depositor));
        self
    }

    pub fn vault(mut self, pool: PoolId, vault: VaultId) -> Self {
        self.vaults.push((pool, vault));
        self
    }
}

pub(crate) struct Checkpoint {
    next_pool_id: PoolId,
    pools: Vec<(PoolId, Option<Pool>)>,
    supplies: Vec<(PoolId, Option<u128>)>,
    positions: Vec<(AccountId, PoolId, Option<Position>)>,
    vaults: Vec<(PoolId, VaultId, Option<Vault>)>,
    stakes: Vec<(PoolId, VaultId, AccountId, Option<Stake>)>,
}

impl Checkpoint {
    pub fn capture(
        registry: &PoolRegistry,
        ledger: &OwnershipLedger,
        vaults: &RewardVaults,
        touched: &Touched,
    ) -> Self {
        let mut supply_pools: Vec<PoolId> = touched
            .pools
            .iter()
            .copied()
            .chain(touched.positions.iter().map(|(_, pool)| *pool))
            .collect();
        supply_pools.sort();
        supply_pools.dedup();

        Self {
            next_pool_id: registry.next_pool_id(),
            pools: touched
                .pools
                .iter()
                .map(|id| (*id, registry.raw_pool(*id)))
                .collect(),
            supplies: supply_pools
                .into_iter()
                .map(|id| (id, ledger.raw_supply(id)))
                .collect(),
            positions: touched
                .positions
                .iter()
                .map(|(owner, pool)| (*owner, *pool, ledger.raw_position(owner, *pool)))
                .collect(),
            vaults: touched
                .vaults
                .iter()
                .map(|(pool, id)| (*pool, *id, vaults.raw_vault(*pool, *id)))
                .collect(),
            stakes: touched
                .stakes
                .iter()
                .map(|(pool, id, who)| (*pool, *id, *who, vaults.raw_stake(*pool, *id, who)))
                .collect(),
        }
    }

    pub fn restore(
        self,
        registry: &mut PoolRegistry,
        ledger: &mut OwnershipLedger,
        vaults: &mut RewardVaults,
    ) {
        registry.restore_next_id(self.next_pool_id);
        for (id, pool) in self.pools {
            registry.restore_pool(id, pool);
        }
        for (id, supply) in self.supplies {
            ledger.restore_supply(id, supply);
        }
        for (owner, pool, position) in self.positions {
            ledger.restore_position(&owner, pool, position);
        }
        for (pool, id, vault) in self.vaults {
            vaults.restore_vault(pool, id, vault);
        }
        for (pool, id, who, stake) in self.stakes {
            vaults.restore_stake(pool, id, &who, stake);
        }
    }
}
