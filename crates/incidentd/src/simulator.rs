//! Background chaos loop.
//!
//! Each cycle sleeps a random delay, then stops one running victim chosen
//! uniformly at random. An unreachable runtime or an empty victim set skips
//! the cycle. Shutdown is only observed while sleeping, so a stop already
//! sent to the runtime always runs to completion.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SimulatorConfig;
use crate::faults::{FaultController, FaultOutcome};
use crate::runtime::{ContainerFilter, ContainerRuntime};
use crate::shutdown::ShutdownListener;

/// Delay range and victim selection
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub victim_tag: String,
    pub seed: Option<u64>,
}

impl From<&SimulatorConfig> for SimulatorSettings {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            min_delay: Duration::from_secs(config.min_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            victim_tag: config.victim_tag.clone(),
            seed: config.seed,
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    RuntimeUnavailable,
    NoVictims,
    Stopped(String),
    /// Victim was already down by the time the stop landed
    AlreadyStopped(String),
    Failed { victim: String, error: String },
}

pub struct Simulator {
    faults: Arc<FaultController>,
    runtime: Arc<dyn ContainerRuntime>,
    settings: SimulatorSettings,
    rng: StdRng,
}

impl Simulator {
    pub fn new(
        faults: Arc<FaultController>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: SimulatorSettings,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            faults,
            runtime,
            settings,
            rng,
        }
    }

    /// Uniform in `[min_delay, max_delay]`, millisecond resolution.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.settings.min_delay.as_millis() as u64;
        let max = (self.settings.max_delay.as_millis() as u64).max(min);
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// One injection attempt. Never returns an error: every failure is an outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if let Err(e) = self.runtime.ping().await {
            info!("Simulator skipping cycle, runtime unavailable: {}", e);
            return CycleOutcome::RuntimeUnavailable;
        }

        let filter = ContainerFilter::running_named(&self.settings.victim_tag);
        let victims = match self.runtime.list(&filter).await {
            Ok(victims) => victims,
            Err(e) => {
                info!("Simulator skipping cycle, cannot list containers: {}", e);
                return CycleOutcome::RuntimeUnavailable;
            }
        };

        let Some(victim) = victims.choose(&mut self.rng) else {
            info!("Simulator found no running victims");
            return CycleOutcome::NoVictims;
        };

        warn!("Simulator injecting fault: stopping {}", victim.name);
        match self.faults.stop_container(victim).await {
            Ok(FaultOutcome::Applied) => CycleOutcome::Stopped(victim.name.clone()),
            Ok(FaultOutcome::AlreadyInState) => CycleOutcome::AlreadyStopped(victim.name.clone()),
            Err(e) => {
                warn!("Simulator failed to stop {}: {}", victim.name, e);
                CycleOutcome::Failed {
                    victim: victim.name.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Spawn the loop; it exits at the next sleep once `shutdown` fires.
    pub fn start(mut self, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Simulator started (delay {:?}..{:?}, victim tag '{}')",
                self.settings.min_delay, self.settings.max_delay, self.settings.victim_tag
            );

            loop {
                let delay = self.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait() => break,
                }
                self.run_cycle().await;
            }

            info!("Simulator stopped");
        })
    }
}
