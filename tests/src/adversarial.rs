// ============ Tidepool Adversarial Tests ============
// Every rejected call, and every call whose settlement fails after internal
// state was committed, must leave the exchange exactly as it found it.
//
// The state digest covers pools, positions, approvals and vaults, so a
// matching digest proves no partial update survived.

use tidepool_core::*;
use tidepool_math::PRECISION;

// ============ Constants ============

const E18: u128 = PRECISION;
const FUNDING: u128 = 1_000_000 * E18;

// ============ Rejecting Bank ============

/// Memory bank that can be told to refuse the next settlement.
#[derive(Default)]
struct RejectingBank {
    inner: MemoryBank,
    reject_next: bool,
    settlements: usize,
}

impl AssetBank for RejectingBank {
    fn settle(&mut self, custodian: &AccountId, transfers: &[Transfer]) -> std::result::Result<(), BankError> {
        self.settlements += 1;
        if std::mem::take(&mut self.reject_next) {
            return Err(BankError::Rejected("asset contract reverted".to_string()));
        }
        self.inner.settle(custodian, transfers)
    }
}

// ============ Helper Functions ============

fn owner() -> AccountId {
    AccountId::from_label("owner")
}

fn attacker() -> AccountId {
    AccountId::from_label("attacker")
}

fn token_a() -> AssetId {
    AssetId::from_label("A")
}

fn token_b() -> AssetId {
    AssetId::from_label("B")
}

fn reward() -> AssetId {
    AssetId::from_label("REWARD")
}

fn make_bank(config: &ExchangeConfig) -> RejectingBank {
    let mut bank = RejectingBank::default();
    for who in [owner(), attacker()] {
        for asset in [token_a(), token_b(), reward()] {
            bank.inner.mint(&asset, &who, FUNDING).unwrap();
            bank.inner.approve(&asset, &who, &config.custodian, u128::MAX);
        }
    }
    bank
}

/// One constant-product pool (id 1) with a funded vault (id 1) and a locked stake.
fn make_exchange() -> Exchange<RejectingBank> {
    let config = ExchangeConfig::default();
    let bank = make_bank(&config);
    let mut ex = Exchange::with_config(config, bank);
    ex.create_pair(
        &owner(),
        &owner(),
        token_a(),
        token_b(),
        1000 * E18,
        1000 * E18,
        Curve::ConstantProduct,
        30,
        b"",
    )
    .unwrap();
    ex.transfer(&owner(), &attacker(), PoolId(1), 100 * E18).unwrap();
    ex.create_vault(&owner(), PoolId(1), VaultId(1), reward(), 1000 * E18, 0)
        .unwrap();
    ex.deposit(&owner(), PoolId(1), VaultId(1), 400 * E18, 0).unwrap();
    ex
}

/// Snapshot of everything observable: engine state plus every bank balance the tests touch.
fn observe(ex: &Exchange<RejectingBank>) -> ([u8; 32], Vec<u128>) {
    let custodian = ex.config().custodian;
    let mut balances = Vec::new();
    for who in [owner(), attacker(), custodian] {
        for asset in [token_a(), token_b(), reward()] {
            balances.push(ex.bank().inner.balance_of(&asset, &who));
        }
    }
    (ex.state_digest(), balances)
}

fn assert_rejected_cleanly<T: std::fmt::Debug>(
    ex: &mut Exchange<RejectingBank>,
    expected: ExchangeError,
    op: impl FnOnce(&mut Exchange<RejectingBank>) -> Result<T>,
) {
    let before = observe(ex);
    let result = op(ex);
    assert_eq!(result.unwrap_err(), expected);
    assert_eq!(observe(ex), before);
}

fn rejected() -> ExchangeError {
    ExchangeError::Transfer(BankError::Rejected("asset contract reverted".to_string()))
}

// ============ Attack 1: Invalid Inputs ============

#[test]
fn test_invalid_inputs_leave_no_trace() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let me = attacker();

    assert_rejected_cleanly(&mut ex, ExchangeError::InvalidAsset, |ex| {
        ex.create_pair(&me, &me, token_a(), token_a(), E18, E18, Curve::ConstantProduct, 0, b"")
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.create_pair(&me, &me, token_a(), token_b(), 0, E18, Curve::ConstantProduct, 0, b"")
    });
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::InvalidFee { fee_bps: 5000, max_bps: 1000 },
        |ex| ex.create_pair(&me, &me, token_a(), token_b(), E18, E18, Curve::ConstantProduct, 5000, b""),
    );
    // sqrt(1000 * 1000) does not exceed the minimum liquidity
    assert_rejected_cleanly(&mut ex, ExchangeError::InsufficientLiquidity, |ex| {
        ex.create_pair(&me, &me, token_a(), token_b(), 1000, 1000, Curve::ConstantProduct, 0, b"")
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::PoolNotFound(PoolId(7)), |ex| {
        ex.swap(&me, &me, PoolId(7), &token_a(), E18)
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::InvalidAsset, |ex| {
        ex.swap(&me, &me, pool, &reward(), E18)
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.swap(&me, &me, pool, &token_a(), 0)
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.add_liquidity(&me, &me, pool, 0, E18, b"")
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.remove_liquidity(&me, &me, pool, 0)
    });
}

// ============ Attack 2: Spending Locked Shares ============

#[test]
fn test_locked_shares_cannot_leave() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let holder = owner();
    let unlocked = ex.balance_of(&holder, pool) - ex.locked_balance_of(&holder, pool);

    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::Locked { unlocked, requested: unlocked + 1 },
        |ex| ex.transfer(&holder, &attacker(), pool, unlocked + 1),
    );
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::InsufficientBalance { available: unlocked, required: unlocked + 1 },
        |ex| ex.remove_liquidity(&holder, &holder, pool, unlocked + 1),
    );
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::InsufficientBalance { available: unlocked, required: unlocked + 1 },
        |ex| ex.deposit(&holder, pool, VaultId(1), unlocked + 1, 10),
    );

    // An approved operator is bound by the same lock
    ex.set_approval_for_all(&holder, &attacker(), true);
    let operator = attacker();
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::Locked { unlocked, requested: unlocked + 1 },
        |ex| ex.transfer_from(&operator, &holder, &operator, pool, unlocked + 1),
    );
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::Locked { unlocked, requested: unlocked + 1 },
        |ex| ex.batch_transfer_from(&operator, &holder, &operator, &[(pool, unlocked), (pool, 1)]),
    );
}

#[test]
fn test_unapproved_operator_rejected() {
    let mut ex = make_exchange();
    let victim = owner();
    let thief = attacker();
    assert_rejected_cleanly(&mut ex, ExchangeError::NotApproved, |ex| {
        ex.transfer_from(&thief, &victim, &thief, PoolId(1), 1)
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::NotApproved, |ex| {
        ex.batch_transfer_from(&thief, &victim, &thief, &[(PoolId(1), 1)])
    });
}

// ============ Attack 3: Vault Abuse ============

#[test]
fn test_vault_abuse_rejected() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let me = attacker();

    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::VaultExists { pool, vault: VaultId(1) },
        |ex| ex.create_vault(&me, pool, VaultId(1), reward(), E18, 0),
    );
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.create_vault(&me, pool, VaultId(2), reward(), 0, 0)
    });
    assert_rejected_cleanly(&mut ex, ExchangeError::PoolNotFound(PoolId(3)), |ex| {
        ex.create_vault(&me, PoolId(3), VaultId(1), reward(), E18, 0)
    });
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::VaultNotFound { pool, vault: VaultId(9) },
        |ex| ex.deposit(&me, pool, VaultId(9), E18, 0),
    );
    // Withdrawing someone else's stake: the attacker has nothing locked
    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::InsufficientLocked { locked: 0, requested: E18 },
        |ex| ex.withdraw(&me, pool, VaultId(1), E18, &me, 100),
    );
    assert_rejected_cleanly(&mut ex, ExchangeError::ZeroAmount, |ex| {
        ex.withdraw(&owner(), pool, VaultId(1), 0, &me, 100)
    });
}

#[test]
fn test_late_joiner_cannot_snipe_past_rewards() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let end = ex.config().vault.emission_period_secs;

    // Owner has been locked since t=0; the attacker joins just before the end
    ex.deposit(&attacker(), pool, VaultId(1), 100 * E18, end - 1).unwrap();
    let sniped = ex
        .withdraw(&attacker(), pool, VaultId(1), 100 * E18, &attacker(), end)
        .unwrap();

    // One second of emission shared 1:4 with the owner
    let one_second = 1000 * E18 / end as u128;
    assert!(sniped <= one_second / 5 + 1);
}

// ============ Attack 4: Settlement Failure After Commit ============

#[test]
fn test_bank_failure_rolls_back_every_operation() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let me = attacker();
    let end = ex.config().vault.emission_period_secs;

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.create_pair(&me, &me, token_a(), token_b(), E18, E18, Curve::ConstantSum, 0, b"")
    });
    assert_eq!(ex.pool_count(), 1);

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| ex.swap(&me, &me, pool, &token_a(), E18));

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.add_liquidity(&me, &me, pool, E18, E18, b"")
    });

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.remove_liquidity(&me, &me, pool, 10 * E18)
    });

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.create_vault(&me, pool, VaultId(2), reward(), E18, 0)
    });

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.withdraw(&owner(), pool, VaultId(1), 100 * E18, &owner(), end / 2)
    });

    ex.bank_mut().reject_next = true;
    assert_rejected_cleanly(&mut ex, rejected(), |ex| {
        ex.claim(&owner(), pool, VaultId(1), &owner(), end / 2)
    });

    // The next pool still gets id 2 and the rolled-back claim is paid in full later
    let created = ex
        .create_pair(&me, &me, token_a(), token_b(), E18, E18, Curve::ConstantSum, 0, b"")
        .unwrap();
    assert_eq!(created.pool_id, PoolId(2));
    let paid = ex.claim(&owner(), pool, VaultId(1), &owner(), end / 2).unwrap();
    assert!(paid > 499 * E18 && paid <= 500 * E18);
}

#[test]
fn test_insufficient_allowance_rolls_back() {
    let mut ex = make_exchange();
    let custodian = ex.config().custodian;
    ex.bank_mut().inner.approve(&token_a(), &attacker(), &custodian, E18);
    let me = attacker();

    assert_rejected_cleanly(
        &mut ex,
        ExchangeError::Transfer(BankError::InsufficientAllowance {
            asset: token_a(),
            available: E18,
            required: 2 * E18,
        }),
        |ex| ex.swap(&me, &me, PoolId(1), &token_a(), 2 * E18),
    );
    ex.swap(&me, &me, PoolId(1), &token_a(), E18).unwrap();
    assert_eq!(ex.bank().inner.allowance(&token_a(), &me, &custodian), 0);
}

#[test]
fn test_empty_settlement_is_still_the_commit_point() {
    let mut ex = make_exchange();
    let before = ex.bank().settlements;
    ex.bank_mut().reject_next = true;
    // A deposit moves no assets, but a refused settlement still undoes the lock
    let result = ex.deposit(&attacker(), PoolId(1), VaultId(1), E18, 1);
    assert_eq!(result, Err(rejected()));
    assert_eq!(ex.bank().settlements, before + 1);
    assert_eq!(ex.locked_balance_of(&attacker(), PoolId(1)), 0);
}

// ============ Attack 5: Pool Draining ============

#[test]
fn test_cannot_drain_reserves() {
    let mut ex = make_exchange();
    let pool = PoolId(1);
    let me = attacker();

    // Constant product never hands out the whole reserve
    let out = ex.swap(&me, &me, pool, &token_a(), 500_000 * E18).unwrap();
    let p = ex.pool(pool).unwrap();
    assert!(out < 1000 * E18);
    assert!(p.reserve_b > 0);

    // The minimum liquidity stays behind after every other holder exits
    let held = ex.balance_of(&me, pool);
    ex.remove_liquidity(&me, &me, pool, held).unwrap();
    let p = ex.pool(pool).unwrap();
    assert!(p.reserve_a > 0 && p.reserve_b > 0);
    assert!(ex.total_supply(pool) >= tidepool_types::MINIMUM_LIQUIDITY);

    // Constant sum refuses a swap that would empty the output side
    let sum_pool = ex
        .create_pair(&me, &me, token_a(), token_b(), 10 * E18, 10 * E18, Curve::ConstantSum, 0, b"")
        .unwrap()
        .pool_id;
    assert_rejected_cleanly(&mut ex, ExchangeError::InsufficientLiquidity, |ex| {
        ex.swap(&me, &me, sum_pool, &token_a(), 10 * E18)
    });
}
