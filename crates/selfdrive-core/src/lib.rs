//! Core types shared across the selfdrive workspace.

use rand::{SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

pub mod geometry;
pub mod sensor;
pub mod vehicle;

pub use geometry::{
    Intersection, PARALLEL_EPSILON, Point, Polygon, Pose, Segment, polygons_intersect,
    segments_intersect,
};
pub use sensor::{Sensor, SensorConfig};
pub use vehicle::{Autopilot, ControlMode, Controls, Vehicle, VehicleParams};

new_key_type! {
    /// Stable handle for vehicles backed by a generational slot map.
    pub struct VehicleId;
}

/// Number of brain outputs, read as `[forward, left, right, reverse]`.
pub const CONTROL_OUTPUTS: usize = 4;

/// Dimension errors between sensors, brains and their parameter containers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("expected {expected} inputs, received {actual}")]
    InputLength { expected: usize, actual: usize },
    #[error("weight matrix has {actual} rows, level expects {expected}")]
    WeightRows { expected: usize, actual: usize },
    #[error("weight row {row} has {actual} columns, level expects {expected}")]
    WeightColumns {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("bias vector has {actual} entries, level expects {expected}")]
    BiasLength { expected: usize, actual: usize },
    #[error("brain produces {actual} outputs, controls need {expected}")]
    OutputLength { expected: usize, actual: usize },
    #[error("sensor casts {rays} rays but brain takes {inputs} inputs")]
    SensorBrainMismatch { rays: usize, inputs: usize },
    #[error("topology needs at least two layer sizes")]
    EmptyTopology,
    #[error("layer {index} has zero nodes")]
    ZeroSizedLayer { index: usize },
    #[error("level {index} takes {actual} inputs but previous level emits {expected}")]
    LayerLink {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised while configuring or stepping a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("no vehicle with id {0:?}")]
    UnknownVehicle(VehicleId),
    /// A previous step failed part-way; vehicle state no longer matches the clock.
    #[error("world halted after a failed step at tick {0:?}")]
    Halted(Tick),
}

/// Thin trait object used to drive brain evaluations without coupling to concrete brain crates.
pub trait BrainRunner: Send + Sync {
    /// Static identifier of the brain implementation.
    fn kind(&self) -> &'static str;

    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize;

    /// Evaluate outputs for the provided sensor inputs.
    fn tick(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Which vehicles count as obstacles for collision and sensing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ObstacleScope {
    /// Every other vehicle.
    #[default]
    AllVehicles,
    /// Only scripted traffic; traffic itself only checks road borders.
    TrafficOnly,
}

/// Hidden layer layout for autonomous brains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrainSettings {
    pub hidden_layers: Vec<usize>,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self {
            hidden_layers: vec![6],
        }
    }
}

/// Static configuration for a selfdrive world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Body and engine parameters for human and autonomous vehicles.
    pub vehicle: VehicleParams,
    /// Sensor fan mounted on autonomous vehicles.
    pub sensor: SensorConfig,
    pub brain: BrainSettings,
    /// Top speed of scripted traffic.
    pub traffic_max_speed: f64,
    pub obstacle_scope: ObstacleScope,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible brains.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vehicle: VehicleParams::default(),
            sensor: SensorConfig::default(),
            brain: BrainSettings::default(),
            traffic_max_speed: 2.0,
            obstacle_scope: ObstacleScope::default(),
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl SimulationConfig {
    /// Reject values the kinematics and sensors cannot work with.
    pub fn validate(&self) -> Result<(), WorldError> {
        let v = &self.vehicle;
        if !(v.width > 0.0 && v.height > 0.0) {
            return Err(WorldError::InvalidConfig(
                "vehicle width and height must be positive",
            ));
        }
        if !(v.max_speed > 0.0 && self.traffic_max_speed > 0.0) {
            return Err(WorldError::InvalidConfig("max speeds must be positive"));
        }
        if v.acceleration < 0.0 || v.friction < 0.0 || v.steer_rate < 0.0 {
            return Err(WorldError::InvalidConfig(
                "acceleration, friction and steer_rate must be non-negative",
            ));
        }
        if self.sensor.ray_count == 0 {
            return Err(WorldError::InvalidConfig("sensor needs at least one ray"));
        }
        if !(self.sensor.ray_length > 0.0) || self.sensor.ray_spread < 0.0 {
            return Err(WorldError::InvalidConfig(
                "ray_length must be positive and ray_spread non-negative",
            ));
        }
        if self.brain.hidden_layers.contains(&0) {
            return Err(WorldError::InvalidConfig(
                "hidden layers must have at least one node",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig("history_capacity must be non-zero"));
        }
        Ok(())
    }

    /// Layer sizes for an autonomous brain: rays, hidden layers, controls.
    #[must_use]
    pub fn brain_topology(&self) -> Vec<usize> {
        let mut topology = Vec::with_capacity(self.brain.hidden_layers.len() + 2);
        topology.push(self.sensor.ray_count);
        topology.extend_from_slice(&self.brain.hidden_layers);
        topology.push(CONTROL_OUTPUTS);
        topology
    }

    /// Parameters for scripted traffic: the shared body with the traffic top speed.
    #[must_use]
    pub fn traffic_params(&self) -> VehicleParams {
        VehicleParams {
            max_speed: self.traffic_max_speed,
            ..self.vehicle
        }
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// High level simulation clock (ticks processed since start).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted by a single [`World::step`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Vehicles that became damaged during this tick.
    pub newly_damaged: Vec<VehicleId>,
}

/// Aggregate snapshot recorded after every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub active: usize,
    pub damaged: usize,
    pub leader: Option<VehicleId>,
    pub leader_y: Option<f64>,
}

/// Per-vehicle footprint captured between the two tick phases.
#[derive(Debug, Clone, Copy)]
struct Footprint {
    id: VehicleId,
    mode: ControlMode,
    polygon: Polygon,
}

/// Road borders plus every vehicle on them.
pub struct World {
    config: SimulationConfig,
    tick: Tick,
    borders: Vec<Segment>,
    vehicles: SlotMap<VehicleId, Vehicle>,
    history: VecDeque<TickSummary>,
    halted: bool,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("borders", &self.borders.len())
            .field("vehicle_count", &self.vehicles.len())
            .field("halted", &self.halted)
            .finish()
    }
}

impl World {
    /// Instantiate a world over the given road borders.
    pub fn new(config: SimulationConfig, borders: Vec<Segment>) -> Result<Self, WorldError> {
        config.validate()?;
        debug!(borders = borders.len(), scope = ?config.obstacle_scope, "world created");
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            borders,
            vehicles: SlotMap::with_key(),
            history: VecDeque::with_capacity(history_capacity),
            halted: false,
        })
    }

    /// Insert a fully constructed vehicle.
    pub fn spawn(&mut self, vehicle: Vehicle) -> VehicleId {
        self.vehicles.insert(vehicle)
    }

    /// Scripted traffic at `(x, y)` using the configured traffic parameters.
    pub fn spawn_traffic(&mut self, x: f64, y: f64) -> VehicleId {
        self.spawn(Vehicle::scripted(x, y, self.config.traffic_params()))
    }

    /// Human-driven vehicle at `(x, y)` without sensors.
    pub fn spawn_human(&mut self, x: f64, y: f64) -> VehicleId {
        self.spawn(Vehicle::human(x, y, self.config.vehicle))
    }

    /// Autonomous vehicle at `(x, y)` wearing the configured sensor and `brain`.
    pub fn spawn_autonomous(
        &mut self,
        x: f64,
        y: f64,
        brain: Box<dyn BrainRunner>,
    ) -> Result<VehicleId, WorldError> {
        let autopilot = Autopilot::new(Sensor::new(self.config.sensor), brain)?;
        Ok(self.spawn(Vehicle::autonomous(x, y, self.config.vehicle, autopilot)))
    }

    pub fn remove(&mut self, id: VehicleId) -> Option<Vehicle> {
        self.vehicles.remove(id)
    }

    /// Forward manual controls to a human-driven vehicle.
    pub fn steer(&mut self, id: VehicleId, controls: Controls) -> Result<bool, WorldError> {
        let vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or(WorldError::UnknownVehicle(id))?;
        Ok(vehicle.steer(controls))
    }

    /// Integrate every vehicle, then assess damage, sense and think against
    /// the footprints from the first phase.
    ///
    /// A brain failure in the second phase leaves vehicles moved but the clock
    /// unchanged, so the world halts: the failing call returns the shape error
    /// and every later call returns [`WorldError::Halted`] without touching any
    /// vehicle.
    pub fn step(&mut self) -> Result<TickEvents, WorldError> {
        if self.halted {
            return Err(WorldError::Halted(self.tick));
        }
        let next_tick = self.tick.next();

        self.stage_integrate();
        let footprints = self.stage_footprints();
        let newly_damaged = match self.stage_assess(&footprints) {
            Ok(ids) => ids,
            Err(err) => {
                self.halted = true;
                warn!(tick = next_tick.0, error = %err, "step failed; world halted");
                return Err(err);
            }
        };

        self.tick = next_tick;
        self.record_summary();

        Ok(TickEvents {
            tick: self.tick,
            newly_damaged,
        })
    }

    fn stage_integrate(&mut self) {
        let mut vehicles: Vec<&mut Vehicle> = self.vehicles.values_mut().collect();
        vehicles.par_iter_mut().for_each(|vehicle| vehicle.integrate());
    }

    fn stage_footprints(&self) -> Vec<Footprint> {
        self.vehicles
            .iter()
            .map(|(id, vehicle)| Footprint {
                id,
                mode: vehicle.mode(),
                polygon: *vehicle.polygon(),
            })
            .collect()
    }

    fn stage_assess(&mut self, footprints: &[Footprint]) -> Result<Vec<VehicleId>, WorldError> {
        let borders = &self.borders;
        let scope = self.config.obstacle_scope;
        let vehicles: Vec<(VehicleId, &mut Vehicle)> = self.vehicles.iter_mut().collect();

        let outcomes = vehicles
            .into_par_iter()
            .map(|(id, vehicle)| {
                let obstacles = obstacles_for(id, vehicle.mode(), scope, footprints);
                vehicle
                    .assess(borders, &obstacles)
                    .map(|damaged| damaged.then_some(id))
            })
            .collect::<Result<Vec<_>, ShapeError>>()?;

        Ok(outcomes.into_iter().flatten().collect())
    }

    fn record_summary(&mut self) {
        let summary = self.summary();
        trace!(
            tick = summary.tick.0,
            active = summary.active,
            damaged = summary.damaged,
            leader_y = ?summary.leader_y,
            "tick complete"
        );
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Summary of the current state.
    #[must_use]
    pub fn summary(&self) -> TickSummary {
        let damaged = self.damaged_count();
        let leader = self.leader();
        TickSummary {
            tick: self.tick,
            active: self.vehicles.len() - damaged,
            damaged,
            leader: leader.map(|(id, _)| id),
            leader_y: leader.map(|(_, vehicle)| vehicle.pose().y),
        }
    }

    /// Autonomous vehicle furthest up the road (smallest y).
    #[must_use]
    pub fn leader(&self) -> Option<(VehicleId, &Vehicle)> {
        self.vehicles
            .iter()
            .filter(|(_, vehicle)| vehicle.mode() == ControlMode::Autonomous)
            .min_by(|(_, a), (_, b)| a.pose().y.total_cmp(&b.pose().y))
    }

    #[must_use]
    pub fn damaged_count(&self) -> usize {
        self.vehicles.values().filter(|v| v.is_damaged()).count()
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// True once a step has failed; see [`World::step`].
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn borders(&self) -> &[Segment] {
        &self.borders
    }

    #[must_use]
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Mutable access between ticks, e.g. to overwrite brain weights.
    pub fn vehicle_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = (VehicleId, &Vehicle)> {
        self.vehicles.iter()
    }

    #[must_use]
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<TickSummary> {
        &self.history
    }
}

fn obstacles_for(
    id: VehicleId,
    mode: ControlMode,
    scope: ObstacleScope,
    footprints: &[Footprint],
) -> Vec<Polygon> {
    let counts = |other: &Footprint| match scope {
        ObstacleScope::AllVehicles => true,
        ObstacleScope::TrafficOnly => {
            mode != ControlMode::Scripted && other.mode == ControlMode::Scripted
        }
    };
    footprints
        .iter()
        .filter(|other| other.id != id && counts(other))
        .map(|other| other.polygon)
        .collect()
}
