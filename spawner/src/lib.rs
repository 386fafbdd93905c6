//! Timed procedural spawn-point scheduling.
//!
//! A bounded set of spawn spots is topped up at a fixed interval and decays
//! over time; each tick every live spot attempts one spawn per registered
//! kind inside a square scatter region, throttled by a global per-frame
//! budget and a per-spot lifetime cap. Fluid kinds additionally seed a
//! persisted cloud field and are tracked until that field is depleted.
//! Purely local: driven by the frame clock, no distributed state.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type KindId = u32;
pub type EntityId = u64;

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Maximum number of simultaneously live spots.
    pub max_spots: usize,
    /// Seconds a spot stays alive once created.
    pub spot_lifetime: f32,
    /// Seconds between top-up passes.
    pub topup_interval: f32,
    /// Total entities a single spot may ever produce.
    pub per_spot_cap: u32,
    /// Successful spawns allowed per tick, shared across all spots.
    pub frame_budget: u32,
    /// Half-extent of the square scatter region around a spot.
    pub scatter_extent: f32,
    /// Half-extent of the square area spots are placed in.
    pub area_extent: f32,
    /// Quantity a fluid spawn seeds into the cloud field.
    pub cloud_seed_amount: f32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_spots: 16,
            spot_lifetime: 120.0,
            topup_interval: 10.0,
            per_spot_cap: 8,
            frame_budget: 4,
            scatter_extent: 6.0,
            area_extent: 200.0,
            cloud_seed_amount: 1.0,
        }
    }
}

/// A registered spawnable kind. `density` weighs the per-spot attempt
/// probability each tick; attempts are skipped while the world already
/// holds `min_population` entities of the kind.
#[derive(Debug, Clone)]
pub struct SpawnKind {
    pub kind: KindId,
    pub density: f32,
    pub min_population: u32,
    /// Fluid/point-cloud kinds seed the persisted cloud field at spawn.
    pub fluid: bool,
}

/// A timed, capacity-limited spatial anchor for procedural creation.
#[derive(Debug, Clone)]
pub struct SpawnSpot {
    pub position: (f32, f32),
    pub remaining: f32,
    pub spawned: u32,
}

/// What one tick did. `budget_skipped` attempts are not errors; they are
/// retried naturally on the next tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpawnReport {
    pub spots_added: usize,
    pub spawned: u32,
    pub budget_skipped: u32,
    pub expired: usize,
}

/// The externally supplied world the scheduler creates entities in. A
/// `spawn` returning `None` means the world refused; that costs no budget.
pub trait SpawnWorld {
    fn spawn(&mut self, kind: KindId, position: (f32, f32)) -> Option<EntityId>;
    fn population(&self, kind: KindId) -> u32;
    fn seed_cloud(&mut self, position: (f32, f32), amount: f32);
    fn sample_cloud(&self, position: (f32, f32)) -> f32;
    fn despawn(&mut self, entity: EntityId);
}

struct Emitter {
    entity: EntityId,
    position: (f32, f32),
}

pub struct SpawnScheduler {
    config: SpawnConfig,
    kinds: Vec<SpawnKind>,
    spots: Vec<SpawnSpot>,
    emitters: Vec<Emitter>,
    topup_accum: f32,
    rng: StdRng,
    observer: Option<Box<dyn FnMut(&[(f32, f32)]) + Send>>,
}

impl SpawnScheduler {
    pub fn new(config: SpawnConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic variant for tests and replays.
    pub fn with_seed(config: SpawnConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SpawnConfig, rng: StdRng) -> Self {
        Self {
            config,
            kinds: Vec::new(),
            spots: Vec::new(),
            emitters: Vec::new(),
            topup_accum: 0.0,
            rng,
            observer: None,
        }
    }

    /// Registers or replaces a spawnable kind.
    pub fn register_kind(&mut self, kind: SpawnKind) {
        info!(
            "registering spawn kind {} (density {}, min population {})",
            kind.kind, kind.density, kind.min_population
        );
        match self.kinds.iter_mut().find(|k| k.kind == kind.kind) {
            Some(existing) => *existing = kind,
            None => self.kinds.push(kind),
        }
    }

    pub fn unregister_kind(&mut self, kind: KindId) {
        self.kinds.retain(|k| k.kind != kind);
    }

    /// Observer for the spot coordinate set; invoked only on ticks that
    /// actually added spots.
    pub fn set_observer(&mut self, observer: Box<dyn FnMut(&[(f32, f32)]) + Send>) {
        self.observer = Some(observer);
    }

    pub fn spots(&self) -> &[SpawnSpot] {
        &self.spots
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    /// One tick: top up spots, attempt spawns under the shared budget,
    /// expire spent spots, drain depleted fluid emitters.
    pub fn update(&mut self, dt: f32, world: &mut dyn SpawnWorld) -> SpawnReport {
        let mut report = SpawnReport::default();

        self.topup_accum += dt;
        if self.topup_accum >= self.config.topup_interval {
            self.topup_accum = 0.0;
            while self.spots.len() < self.config.max_spots {
                let position = scatter(&mut self.rng, (0.0, 0.0), self.config.area_extent);
                self.spots.push(SpawnSpot {
                    position,
                    remaining: self.config.spot_lifetime,
                    spawned: 0,
                });
                report.spots_added += 1;
            }
            if report.spots_added > 0 {
                debug!("topped up {} spawn spots", report.spots_added);
                let positions: Vec<(f32, f32)> =
                    self.spots.iter().map(|spot| spot.position).collect();
                if let Some(observer) = self.observer.as_mut() {
                    observer(&positions);
                }
            }
        }

        let mut budget = self.config.frame_budget;
        for spot in &mut self.spots {
            for kind in &self.kinds {
                if spot.spawned >= self.config.per_spot_cap {
                    break;
                }
                if budget == 0 {
                    // Budget exhausted: skipped, retried next tick.
                    report.budget_skipped += 1;
                    continue;
                }
                if world.population(kind.kind) >= kind.min_population {
                    continue;
                }
                if self.rng.gen::<f32>() >= kind.density {
                    continue;
                }

                let position = scatter(&mut self.rng, spot.position, self.config.scatter_extent);
                if let Some(entity) = world.spawn(kind.kind, position) {
                    budget -= 1;
                    spot.spawned += 1;
                    report.spawned += 1;
                    if kind.fluid {
                        world.seed_cloud(position, self.config.cloud_seed_amount);
                        self.emitters.push(Emitter { entity, position });
                    }
                }
            }
        }

        // Lifetimes decay after this tick's attempts.
        for spot in &mut self.spots {
            spot.remaining -= dt;
        }
        let before = self.spots.len();
        self.spots.retain(|spot| spot.remaining > 0.0);
        report.expired = before - self.spots.len();

        // Fluid emitters drain against the persisted field and go away
        // once fully depleted.
        let mut depleted = Vec::new();
        self.emitters.retain(|emitter| {
            if world.sample_cloud(emitter.position) <= 0.0 {
                depleted.push(emitter.entity);
                false
            } else {
                true
            }
        });
        for entity in depleted {
            world.despawn(entity);
        }

        report
    }
}

fn scatter(rng: &mut StdRng, center: (f32, f32), extent: f32) -> (f32, f32) {
    if extent <= 0.0 {
        return center;
    }
    (
        center.0 + rng.gen_range(-extent..=extent),
        center.1 + rng.gen_range(-extent..=extent),
    )
}
