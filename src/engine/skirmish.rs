//! A small random-attrition resolver used by the binary as its trial engine.
//!
//! Each round every surviving force inflicts losses on every other surviving
//! force, scaled by its quality and reduced by the battlefield's cover. The
//! last force standing wins; mutual elimination or hitting the round limit is
//! a draw.

use crate::engine::{TrialFactory, TrialFuture};
use crate::model::{SideId, TrialOutcome};
use anyhow::{bail, ensure, Context, Result};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Force {
    pub side: SideId,
    pub strength: u32,
    /// Multiplier on losses inflicted per round; 1.0 is an average force.
    #[serde(default = "default_quality")]
    pub quality: f64,
}

fn default_quality() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battlefield {
    pub name: String,
    /// Fraction of incoming losses absorbed by terrain, in `[0, 1)`.
    #[serde(default)]
    pub cover: f64,
}

impl Default for Battlefield {
    fn default() -> Self {
        Self {
            name: "open field".to_string(),
            cover: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub forces: Vec<Force>,
    #[serde(default)]
    pub battlefield: Battlefield,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_max_rounds() -> u32 {
    200
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.forces.len() >= 2, "a scenario needs at least two forces");
        let mut seen = HashSet::new();
        for force in &self.forces {
            ensure!(
                seen.insert(&force.side),
                "side {} appears more than once",
                force.side
            );
            ensure!(force.strength > 0, "side {} has no strength", force.side);
            ensure!(
                force.quality.is_finite() && force.quality > 0.0,
                "side {} has invalid quality {}",
                force.side,
                force.quality
            );
        }
        ensure!(
            (0.0..1.0).contains(&self.battlefield.cover),
            "cover must be in [0, 1), got {}",
            self.battlefield.cover
        );
        ensure!(self.max_rounds > 0, "max rounds must be at least 1");
        Ok(())
    }

    pub fn has_side(&self, side: &SideId) -> bool {
        self.forces.iter().any(|f| f.side == *side)
    }
}

/// Parse `NAME:STRENGTH[:QUALITY]`.
pub fn parse_force(s: &str) -> Result<Force> {
    let mut parts = s.split(':');
    let side = match parts.next() {
        Some(name) if !name.trim().is_empty() => SideId::new(name.trim()),
        _ => bail!("force {s:?} is missing a side name"),
    };
    let strength = parts
        .next()
        .context("expected NAME:STRENGTH[:QUALITY]")?
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid strength in {s:?}"))?;
    let quality = match parts.next() {
        Some(q) => q
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid quality in {s:?}"))?,
        None => default_quality(),
    };
    if parts.next().is_some() {
        bail!("too many fields in {s:?}");
    }
    Ok(Force {
        side,
        strength,
        quality,
    })
}

/// Resolve one battle to completion.
pub fn resolve(scenario: &Scenario, rng: &mut impl Rng) -> TrialOutcome {
    let mut strength: Vec<f64> = scenario.forces.iter().map(|f| f.strength as f64).collect();
    let absorb = 1.0 - scenario.battlefield.cover;

    for _ in 0..scenario.max_rounds {
        let alive: Vec<usize> = (0..strength.len()).filter(|&i| strength[i] > 0.0).collect();
        match alive.as_slice() {
            [] => return TrialOutcome::Draw,
            [winner] => return TrialOutcome::Win(scenario.forces[*winner].side.clone()),
            _ => {}
        }

        // Losses are computed from start-of-round strength so fire is simultaneous.
        let mut losses = vec![0.0; strength.len()];
        for &attacker in &alive {
            let targets = alive.len() - 1;
            let fire = strength[attacker] * scenario.forces[attacker].quality * 0.1;
            for &target in alive.iter().filter(|&&t| t != attacker) {
                let roll: f64 = rng.gen_range(0.5..1.5);
                losses[target] += fire * roll * absorb / targets as f64;
            }
        }
        for (s, loss) in strength.iter_mut().zip(losses) {
            *s = (*s - loss).max(0.0);
            // Routed once below one effective unit.
            if *s < 1.0 {
                *s = 0.0;
            }
        }
    }

    let alive: Vec<usize> = (0..strength.len()).filter(|&i| strength[i] > 0.0).collect();
    match alive.as_slice() {
        [winner] => TrialOutcome::Win(scenario.forces[*winner].side.clone()),
        _ => TrialOutcome::Draw,
    }
}

/// Trial factory backed by [`resolve`].
#[derive(Debug, Clone)]
pub struct SkirmishEngine {
    scenario: Arc<Scenario>,
    seed: Option<u64>,
    delay: Duration,
    failure_rate: f64,
}

impl SkirmishEngine {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario: Arc::new(scenario),
            seed: None,
            delay: Duration::ZERO,
            failure_rate: 0.0,
        }
    }

    /// Seed trial `i` with `seed + i` for reproducible batches.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Extra wall-clock time spent per trial, to mimic an expensive resolver.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Probability that a trial errors instead of returning an outcome.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn run_blocking(&self, index: u64) -> Result<TrialOutcome> {
        // Each trial works on its own copy of the scenario.
        let scenario: Scenario = (*self.scenario).clone();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
            None => StdRng::from_entropy(),
        };
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            bail!("resolver fault in trial {index} on {}", scenario.battlefield.name);
        }
        Ok(resolve(&scenario, &mut rng))
    }
}

impl TrialFactory for SkirmishEngine {
    fn create(&self, index: u64) -> TrialFuture {
        let engine = self.clone();
        async move {
            tokio::task::spawn_blocking(move || engine.run_blocking(index))
                .await
                .context("resolver task did not complete")?
        }
        .boxed()
    }
}
