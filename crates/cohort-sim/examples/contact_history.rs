//! Contact-history demo: a small population records who met whom each day.
//!
//! Two ragged variables are tracked per individual:
//!
//! - `contacts`: ids of every individual met so far (grows every step).
//! - `infected_on`: the days on which the individual was infected.
//!
//! Each day a `mixing` process draws random contacts and an `infection`
//! process infects contacts of currently infectious individuals. Both read
//! the state committed at the end of the previous day, so the order in which
//! they are registered does not change who they see.
//!
//! Run with: `RUST_LOG=cohort_core=debug cargo run --example contact_history`

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use cohort_core::prelude::*;
use cohort_sim::prelude::*;

const POPULATION: usize = 200;
const DAYS: u64 = 30;
const CONTACTS_PER_DAY: usize = 3;
const INFECTION_PROBABILITY: f64 = 0.05;
const SEED: u64 = 42;

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config: StepConfig =
        serde_json::from_str(r#"{"dt": 1.0}"#).context("parsing step config")?;

    let mut registry = VariableRegistry::new();
    registry.register(
        "contacts",
        IntegerRaggedVariable::new(vec![Vec::new(); POPULATION]),
    )?;
    // Individual 0 is the index case, infected on day 0.
    let mut initial = vec![Vec::new(); POPULATION];
    initial[0].push(0.0);
    registry.register("infected_on", DoubleRaggedVariable::new(initial))?;

    let mut sim = StepLoop::new(registry, config);

    let mut mixing_rng = Pcg64::seed_from_u64(SEED);
    sim.add_process("mixing", move |ctx| {
        let mut histories = ctx.get::<i32>("contacts")?.get_values();
        for (who, history) in histories.iter_mut().enumerate() {
            for _ in 0..CONTACTS_PER_DAY {
                let other = mixing_rng.gen_range(0..POPULATION);
                if other != who {
                    history.push(other as i32);
                }
            }
        }
        // Keep only individuals whose history actually grew today.
        let previous = ctx.get::<i32>("contacts")?.get_length();
        let (targets, replacements): (Vec<usize>, Vec<Vec<i32>>) = histories
            .into_iter()
            .enumerate()
            .filter(|(i, h)| h.len() > previous[*i])
            .unzip();
        if targets.is_empty() {
            return Ok(());
        }
        ctx.queue_update("contacts", replacements, targets)
    });

    let mut infection_rng = Pcg64::seed_from_u64(SEED + 1);
    sim.add_process("infection", move |ctx| {
        let day = ctx.timestep() as f64;
        let infected_on = ctx.get::<f64>("infected_on")?;
        let infectious = IndexBitset::from_indices(
            POPULATION,
            &(0..POPULATION)
                .filter(|&i| infected_on.values(i).is_some_and(|v| !v.is_empty()))
                .collect::<Vec<_>>(),
        )?;

        let mut newly = IndexBitset::new(POPULATION);
        for contacts in ctx.get::<i32>("contacts")?.get_values_in(&infectious)? {
            for &other in &contacts {
                if infection_rng.gen_bool(INFECTION_PROBABILITY) {
                    newly.insert(other as usize)?;
                }
            }
        }
        for i in infectious.iter() {
            newly.remove(i);
        }

        let records: Vec<Vec<f64>> = newly.iter().map(|_| vec![day]).collect();
        ctx.queue_update_in("infected_on", records, &newly)
    });

    let updates = sim.run(DAYS).context("running simulation")?;

    let infected = sim.registry().get::<f64>("infected_on")?;
    let ever_infected = infected.get_length().iter().filter(|&&n| n > 0).count();
    let contacts = sim.registry().get::<i32>("contacts")?.get_length();
    let mean_contacts = contacts.iter().sum::<usize>() as f64 / POPULATION as f64;

    tracing::info!(updates, "simulation finished");
    println!("=== contact_history ===");
    println!("Population: {POPULATION}  |  Days: {DAYS}  |  Seed: {SEED}");
    println!("Simulated time: {:.1}", sim.sim_time());
    println!("Ever infected: {ever_infected}");
    println!("Mean recorded contacts: {mean_contacts:.1}");
    println!(
        "Last step: {} updates committed in {:?}",
        sim.last_diagnostics().updates_applied(),
        sim.last_diagnostics().commit_time
    );

    Ok(())
}
