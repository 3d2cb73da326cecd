// ============ Tidepool Fuzz / Property-Based Tests ============
// Random operation sequences from a deterministic PRNG, reproducible from the
// seed alone. After every step the invariants below must hold whether the
// step succeeded or was rejected:
//
// - positions of every holder sum to the pool's total supply
// - no position has more locked than it holds
// - constant-product k never decreases across a swap
// - constant-sum x + y never decreases across a swap
// - vault accumulators never decrease and never pay out more than emitted
// - the custodian holds exactly the reserves plus unpaid vault rewards
// - a rejected step leaves the state digest unchanged

use std::collections::BTreeMap;
use tidepool_core::*;
use tidepool_math::{mul_cmp, PRECISION, U256};

// ============ Deterministic PRNG ============

struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    fn next_u128(&mut self) -> u128 {
        let hi = self.next_u64() as u128;
        let lo = self.next_u64() as u128;
        (hi << 64) | lo
    }

    fn range_u128(&mut self, min: u128, max: u128) -> u128 {
        if min >= max {
            return min;
        }
        min + (self.next_u128() % (max - min))
    }

    fn range_u64(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.range_u64(0, items.len() as u64) as usize]
    }
}

// ============ Fixture ============

const E18: u128 = PRECISION;
const FUNDING: u128 = 1_000_000_000 * E18;

fn accounts() -> [AccountId; 3] {
    [
        AccountId::from_label("alice"),
        AccountId::from_label("bob"),
        AccountId::from_label("carol"),
    ]
}

fn assets() -> [AssetId; 3] {
    [
        AssetId::from_label("A"),
        AssetId::from_label("B"),
        AssetId::from_label("C"),
    ]
}

fn reward() -> AssetId {
    AssetId::from_label("REWARD")
}

/// Two pools (A/B constant product, B/C constant sum) each with one vault.
fn make_world(policy: IdleRewardPolicy) -> Exchange<MemoryBank> {
    let config = ExchangeConfig {
        vault: VaultConfig {
            emission_period_secs: 10_000,
            idle_policy: policy,
        },
        ..ExchangeConfig::default()
    };
    let mut bank = MemoryBank::new();
    for who in accounts() {
        for asset in assets().into_iter().chain([reward()]) {
            bank.mint(&asset, &who, FUNDING).unwrap();
            bank.approve(&asset, &who, &config.custodian, u128::MAX);
        }
    }

    let [alice, bob, _] = accounts();
    let [a, b, c] = assets();
    let mut ex = Exchange::with_config(config, bank);
    ex.create_pair(&alice, &alice, a, b, 1000 * E18, 4000 * E18, Curve::ConstantProduct, 30, b"")
        .unwrap();
    ex.create_pair(&bob, &bob, b, c, 5000 * E18, 5000 * E18, Curve::ConstantSum, 4, b"")
        .unwrap();
    ex.create_vault(&alice, PoolId(1), VaultId(1), reward(), 10_000 * E18, 0)
        .unwrap();
    ex.create_vault(&bob, PoolId(2), VaultId(1), reward(), 3_000 * E18, 0)
        .unwrap();
    ex
}

// ============ Invariants ============

fn check_invariants(ex: &Exchange<MemoryBank>, label: &str) {
    let custodian = ex.config().custodian;
    let mut expected_custody: BTreeMap<AssetId, u128> = BTreeMap::new();

    for pool in ex.pools() {
        let mut sum = 0u128;
        for (holder, position) in ex.ledger().holders(pool.id) {
            assert!(
                position.locked <= position.balance,
                "{label}: {holder} locks more than it holds in {}",
                pool.id
            );
            sum += position.balance;
        }
        assert_eq!(sum, ex.total_supply(pool.id), "{label}: supply mismatch in {}", pool.id);
        assert!(pool.reserve_a > 0 && pool.reserve_b > 0, "{label}: empty reserve");

        *expected_custody.entry(pool.asset_a).or_default() += pool.reserve_a;
        *expected_custody.entry(pool.asset_b).or_default() += pool.reserve_b;

        for vault in ex.vaults().vaults_for(pool.id) {
            assert!(vault.paid_out <= vault.emitted, "{label}: vault overpaid");
            assert!(
                vault.emitted + vault.forfeited <= vault.total_reward,
                "{label}: vault over-emitted"
            );
            let locked: u128 = accounts()
                .iter()
                .map(|who| ex.stake(pool.id, vault.id, who).locked)
                .sum();
            assert_eq!(locked, vault.total_locked, "{label}: stake sum mismatch");
            *expected_custody.entry(vault.reward_asset).or_default() +=
                vault.total_reward - vault.paid_out;
        }
    }

    for (asset, amount) in expected_custody {
        assert_eq!(
            ex.bank().balance_of(&asset, &custodian),
            amount,
            "{label}: custody drift for {asset}"
        );
    }
}

/// Accumulator per (pool, vault) before the step.
fn accumulators(ex: &Exchange<MemoryBank>) -> Vec<U256> {
    ex.pools()
        .flat_map(move |pool| ex.vaults().vaults_for(pool.id))
        .map(|vault| vault.acc_reward_per_share)
        .collect()
}

// ============ Random Steps ============

/// Runs one random operation at `now`. Returns whether it succeeded.
fn random_step(ex: &mut Exchange<MemoryBank>, rng: &mut TestRng, now: u64) -> bool {
    let who = rng.pick(&accounts());
    let other = rng.pick(&accounts());
    let pool = PoolId(rng.range_u64(1, 3));
    let (asset_a, asset_b) = {
        let p = ex.pool(pool).unwrap();
        (p.asset_a, p.asset_b)
    };
    let vault = VaultId(1);

    let result = match rng.range_u64(0, 9) {
        0 | 1 => {
            let asset_in = if rng.next_u64() % 2 == 0 { asset_a } else { asset_b };
            let amount = rng.range_u128(1, 800 * E18);
            let k_before = {
                let p = ex.pool(pool).unwrap();
                (p.reserve_a, p.reserve_b, p.curve)
            };
            let result = ex.swap(&who, &other, pool, &asset_in, amount).map(|_| ());
            if result.is_ok() {
                let p = ex.pool(pool).unwrap();
                match k_before.2 {
                    Curve::ConstantProduct => assert!(
                        !mul_cmp(p.reserve_a, p.reserve_b, k_before.0, k_before.1).is_lt(),
                        "k decreased"
                    ),
                    // x + y is the conserved quantity for a constant-sum pool
                    Curve::ConstantSum => assert!(
                        p.reserve_a + p.reserve_b >= k_before.0 + k_before.1,
                        "reserve sum decreased"
                    ),
                }
            }
            result
        }
        2 => {
            let a = rng.range_u128(1, 500 * E18);
            let b = rng.range_u128(1, 500 * E18);
            ex.add_liquidity(&who, &other, pool, a, b, b"").map(|_| ())
        }
        3 => {
            let held = ex.balance_of(&who, pool);
            let shares = rng.range_u128(1, held / 2 + 2);
            ex.remove_liquidity(&who, &other, pool, shares).map(|_| ())
        }
        4 => {
            let held = ex.balance_of(&who, pool);
            let amount = rng.range_u128(0, held + 2);
            ex.transfer(&who, &other, pool, amount)
        }
        5 => {
            let unlocked = ex.balance_of(&who, pool) - ex.locked_balance_of(&who, pool);
            let shares = rng.range_u128(1, unlocked / 2 + 2);
            ex.deposit(&who, pool, vault, shares, now)
        }
        6 => {
            let locked = ex.stake(pool, vault, &who).locked;
            let shares = rng.range_u128(1, locked + 2);
            ex.withdraw(&who, pool, vault, shares, &other, now).map(|_| ())
        }
        7 => {
            let pending = ex.pending_reward(&who, pool, vault, now);
            let claimed = ex.claim(&who, pool, vault, &other, now);
            if let (Ok(pending), Ok(claimed)) = (&pending, &claimed) {
                assert_eq!(pending, claimed, "claim differs from preview");
            }
            claimed.map(|_| ())
        }
        _ => {
            let entries = [(PoolId(1), rng.range_u128(0, E18)), (PoolId(2), rng.range_u128(0, E18))];
            ex.batch_transfer_from(&who, &who, &other, &entries)
        }
    };
    result.is_ok()
}

fn run_sequence(seed: u64, steps: usize, policy: IdleRewardPolicy) {
    let mut rng = TestRng::new(seed);
    let mut ex = make_world(policy);
    let mut now = 0u64;
    let mut succeeded = 0usize;
    check_invariants(&ex, "initial");

    for i in 0..steps {
        now += rng.range_u64(0, 200);
        let digest = ex.state_digest();
        let acc_before = accumulators(&ex);

        let ok = random_step(&mut ex, &mut rng, now);
        if ok {
            succeeded += 1;
        } else {
            assert_eq!(ex.state_digest(), digest, "seed {seed:#x} step {i}: rejected step mutated state");
        }

        let acc_after = accumulators(&ex);
        for (before, after) in acc_before.iter().zip(&acc_after) {
            assert!(after >= before, "seed {seed:#x} step {i}: accumulator decreased");
        }
        check_invariants(&ex, &format!("seed {seed:#x} step {i}"));
    }

    // The generator is tuned so most steps are valid
    assert!(succeeded * 4 > steps, "only {succeeded}/{steps} steps succeeded");
}

// ============ Test 1: Mixed Operations, Carry-Forward ============

#[test]
fn test_fuzz_mixed_operations_carry_forward() {
    for seed in [0xDEAD_BEEF_0000_0001, 0xDEAD_BEEF_0000_0002, 0xDEAD_BEEF_0000_0003] {
        run_sequence(seed, 400, IdleRewardPolicy::CarryForward);
    }
}

// ============ Test 2: Mixed Operations, Forfeit ============

#[test]
fn test_fuzz_mixed_operations_forfeit() {
    for seed in [0xCAFE_0000_0000_0001, 0xCAFE_0000_0000_0002] {
        run_sequence(seed, 400, IdleRewardPolicy::Forfeit);
    }
}

// ============ Test 3: Lock Boundary ============

#[test]
fn test_fuzz_transfer_locked_iff_above_unlocked() {
    let mut rng = TestRng::new(0x10CC_0000_0000_0001);
    let mut ex = make_world(IdleRewardPolicy::CarryForward);
    let [alice, bob, _] = accounts();
    let pool = PoolId(1);

    for _ in 0..200 {
        let balance = ex.balance_of(&alice, pool);
        let unlocked = balance - ex.locked_balance_of(&alice, pool);
        if unlocked > 1 && rng.next_u64() % 3 == 0 {
            let lock = rng.range_u128(1, unlocked / 2 + 1);
            ex.deposit(&alice, pool, VaultId(1), lock, 0).unwrap();
            continue;
        }

        let unlocked = ex.balance_of(&alice, pool) - ex.locked_balance_of(&alice, pool);
        let amount = rng.range_u128(0, unlocked + unlocked / 4 + 2);
        let result = ex.transfer(&alice, &bob, pool, amount);
        if amount > unlocked {
            assert_eq!(
                result,
                Err(ExchangeError::Locked { unlocked, requested: amount })
            );
        } else {
            assert_eq!(result, Ok(()));
            // send it back so alice keeps shares to lock
            ex.transfer(&bob, &alice, pool, amount).unwrap();
        }
    }
}
