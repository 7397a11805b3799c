//! Fixed-timestep game loop driving the scheduler and its collaborators.
//!
//! Each [`GameLoop::tick`]:
//!
//! 1. Steps the physics collaborator (if any) by `fixed_dt`.
//! 2. Routes the reported collision pairs to collider components.
//! 3. Runs one scheduler tick (Start, Update, LateUpdate, Settle).
//! 4. Drains the inbound packet queue into the packet handler slot.
//!
//! Physics and packet delivery happen outside the scheduler tick, so neither
//! ever runs while the registry is being iterated.
//!
//! # Example
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let config = EngineConfig::from_json_str(r#"{ "tick": { "fixed_dt": 0.05 } }"#).unwrap();
//! let mut game = GameLoop::new(config).unwrap();
//! game.handle().create_object("world").unwrap();
//!
//! assert_eq!(game.run_ticks(20), 0);
//! assert_eq!(game.tick_count(), 20);
//! assert!((game.sim_time() - 1.0).abs() < 1e-9);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::physics::{PhysicsEngine, SharedPhysics};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, TickReport};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
}

impl Default for TickConfig {
    /// Defaults to 60 Hz.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
        }
    }
}

impl TickConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.fixed_dt > 0.0 && self.fixed_dt.is_finite() {
            Ok(())
        } else {
            Err(EngineError::InvalidState(format!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            )))
        }
    }
}

/// Everything needed to build a [`GameLoop`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub tick: TickConfig,
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Time spent in the physics step.
    pub physics_time: Duration,
    /// Collision pairs delivered to colliders.
    pub collisions_routed: usize,
    /// Time spent in the scheduler tick.
    pub scheduler_time: Duration,
    /// Packets handed to the packet handler.
    pub packets_delivered: usize,
    /// Time spent delivering packets.
    pub packet_time: Duration,
    /// Total time for the tick.
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// GameLoop
// ---------------------------------------------------------------------------

/// Host driver owning the scheduler.
///
/// The physics engine installed on the scheduler, if any, is stepped before
/// every scheduler tick. Simulation time is derived as `tick_count * fixed_dt`, never accumulated.
pub struct GameLoop {
    /// The scheduler driven by this loop.
    scheduler: Scheduler,
    /// Number of ticks executed so far.
    tick_counter: u64,
    /// Fixed time step in seconds per tick.
    fixed_dt: f64,
    /// Diagnostics from the last tick.
    last_diagnostics: TickDiagnostics,
    /// Scheduler report from the last tick.
    last_report: TickReport,
}

impl GameLoop {
    /// Create a loop with a fresh scheduler.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_scheduler(Scheduler::new(config.scheduler), config.tick)
    }

    /// Create a loop around an existing scheduler.
    pub fn with_scheduler(scheduler: Scheduler, tick: TickConfig) -> Result<Self, EngineError> {
        tick.validate()?;
        Ok(Self {
            scheduler,
            tick_counter: 0,
            fixed_dt: tick.fixed_dt,
            last_diagnostics: TickDiagnostics::default(),
            last_report: TickReport::default(),
        })
    }

    /// Install a physics engine; colliders see it from their next callback.
    pub fn set_physics(&mut self, engine: impl PhysicsEngine + 'static) -> SharedPhysics {
        let engine: Box<dyn PhysicsEngine> = Box::new(engine);
        let shared: SharedPhysics = Arc::new(Mutex::new(engine));
        self.scheduler.set_physics(Some(shared.clone()));
        shared
    }

    /// Run one tick.
    pub fn tick(&mut self) -> &TickReport {
        let start = Instant::now();
        let mut diagnostics = TickDiagnostics::default();

        if let Some(physics) = self.scheduler.physics() {
            let t = Instant::now();
            let pairs = physics.lock().update(self.fixed_dt);
            diagnostics.collisions_routed = self.scheduler.route_collisions(&pairs);
            diagnostics.physics_time = t.elapsed();
        }

        let t = Instant::now();
        self.last_report = self.scheduler.tick(self.fixed_dt);
        diagnostics.scheduler_time = t.elapsed();

        let t = Instant::now();
        diagnostics.packets_delivered = self.scheduler.drain_packets();
        diagnostics.packet_time = t.elapsed();

        self.tick_counter += 1;
        diagnostics.total_time = start.elapsed();
        self.last_diagnostics = diagnostics;

        if !self.last_report.is_clean() {
            tracing::warn!(
                tick = self.tick_counter,
                failures = self.last_report.failures.len(),
                "tick finished with callback failures"
            );
        }
        &self.last_report
    }

    /// Run `n` ticks; returns the total number of callback failures.
    pub fn run_ticks(&mut self, n: u64) -> usize {
        (0..n).map(|_| self.tick().failures.len()).sum()
    }

    // -- accessors ----------------------------------------------------------

    /// Number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulation time in seconds.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn physics(&self) -> Option<SharedPhysics> {
        self.scheduler.physics()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }
}
