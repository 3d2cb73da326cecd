// ============ Tidepool Scenario Simulator ============
// Replays a JSON scenario against a fresh exchange backed by an in-memory
// asset bank, then prints the resulting pools and the state digest.
//
// Usage:
//   cargo run -p tidepool-sim
//   cargo run -p tidepool-sim -- --scenario sim/scenarios/basic.json
//   RUST_LOG=debug cargo run -p tidepool-sim

mod scenario;

use anyhow::{bail, Context};
use scenario::{Runner, Scenario};
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let scenario_path = args
        .iter()
        .position(|a| a == "--scenario")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sim/scenarios/basic.json"));

    let raw = fs::read_to_string(&scenario_path)
        .with_context(|| format!("reading scenario {}", scenario_path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", scenario_path.display()))?;

    println!("=== Tidepool Simulator ===");
    println!("Scenario:  {}", scenario_path.display());
    println!("Custodian: {}", scenario.config.custodian);
    println!("Steps:     {}", scenario.steps.len());
    println!();

    let mut runner = Runner::new(scenario.config.clone());
    for (index, step) in scenario.steps.iter().enumerate() {
        let name = step.action.name();
        match (runner.apply(&step.action), step.expect_failure) {
            (Ok(summary), false) => println!("  [{index:>3}] {name:<16} {summary}"),
            (Err(err), true) => {
                println!("  [{index:>3}] {name:<16} rejected as expected: {err}");
            }
            (Ok(summary), true) => {
                warn!(index, name, "step succeeded but was expected to fail");
                bail!("step {index} ({name}) should have failed but did: {summary}");
            }
            (Err(err), false) => {
                return Err(err).with_context(|| format!("step {index} ({name}) failed"));
            }
        }
    }

    let ex = &runner.exchange;
    println!();
    println!("Pools:");
    for pool in ex.pools() {
        println!(
            "  {}  reserves {} / {}  supply {}  fee {} bps  curve {:?}",
            pool.id,
            pool.reserve_a,
            pool.reserve_b,
            ex.total_supply(pool.id),
            pool.fee_bps,
            pool.curve,
        );
        for vault in ex.vaults().vaults_for(pool.id) {
            println!(
                "    {}  locked {}  emitted {} / {}  paid {}",
                vault.id, vault.total_locked, vault.emitted, vault.total_reward, vault.paid_out,
            );
        }
    }

    let digest = hex::encode(ex.state_digest());
    println!();
    println!("State digest: {digest}");
    info!(steps = scenario.steps.len(), %digest, "scenario complete");
    Ok(())
}
