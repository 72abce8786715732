//! Headless driver: road layout, population bootstrap, run loop and reports.

use anyhow::{Context, Result, ensure};
use selfdrive_brain::{NeuralNetwork, downcast_brain};
use selfdrive_core::{
    ControlMode, ObstacleScope, Point, Segment, SimulationConfig, VehicleId, World,
};
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Vertical half-extent of the road border segments.
const ROAD_EXTENT: f64 = 1_000_000.0;

/// Straight vertical road split into equal lanes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoadConfig {
    pub center_x: f64,
    pub width: f64,
    pub lanes: usize,
}

impl Default for RoadConfig {
    fn default() -> Self {
        Self {
            center_x: 100.0,
            width: 180.0,
            lanes: 3,
        }
    }
}

impl RoadConfig {
    fn left(&self) -> f64 {
        self.center_x - self.width / 2.0
    }

    fn right(&self) -> f64 {
        self.center_x + self.width / 2.0
    }

    /// Left and right road edges.
    #[must_use]
    pub fn borders(&self) -> Vec<Segment> {
        let (left, right) = (self.left(), self.right());
        vec![
            Segment::new(Point::new(left, -ROAD_EXTENT), Point::new(left, ROAD_EXTENT)),
            Segment::new(Point::new(right, -ROAD_EXTENT), Point::new(right, ROAD_EXTENT)),
        ]
    }

    /// Centre x of `lane`, clamped to the rightmost lane.
    #[must_use]
    pub fn lane_center(&self, lane: usize) -> f64 {
        let lanes = self.lanes.max(1);
        let lane_width = self.width / lanes as f64;
        let lane = lane.min(lanes - 1);
        self.left() + lane_width / 2.0 + lane as f64 * lane_width
    }

    #[must_use]
    pub fn middle_lane(&self) -> usize {
        self.lanes / 2
    }
}

/// One scripted traffic car.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrafficSpawn {
    pub lane: usize,
    pub y: f64,
}

/// Everything a headless run needs, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub road: RoadConfig,
    pub traffic: Vec<TrafficSpawn>,
    /// Autonomous agents spawned side by side.
    pub population: usize,
    pub ticks: u64,
    /// Lerp amount applied to every agent network but the first.
    pub mutation: f64,
    /// Where the autonomous agents start.
    pub start_y: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig {
                obstacle_scope: ObstacleScope::TrafficOnly,
                ..SimulationConfig::default()
            },
            road: RoadConfig::default(),
            traffic: default_traffic(),
            population: 100,
            ticks: 2_000,
            mutation: 0.1,
            start_y: 100.0,
        }
    }
}

fn default_traffic() -> Vec<TrafficSpawn> {
    [
        (1, -100.0),
        (0, -300.0),
        (2, -300.0),
        (0, -500.0),
        (1, -500.0),
        (1, -700.0),
        (2, -700.0),
    ]
    .into_iter()
    .map(|(lane, y)| TrafficSpawn { lane, y })
    .collect()
}

/// Evenly staggered traffic: pairs of cars every 200 units up the road.
#[must_use]
pub fn staggered_traffic(count: usize, lanes: usize) -> Vec<TrafficSpawn> {
    let lanes = lanes.max(1);
    (0..count)
        .map(|i| TrafficSpawn {
            lane: (i * 2 + 1) % lanes,
            y: -100.0 - 200.0 * (i / 2) as f64,
        })
        .collect()
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.simulation
            .validate()
            .context("invalid simulation settings")?;
        ensure!(self.road.lanes > 0, "road needs at least one lane");
        ensure!(self.road.width > 0.0, "road width must be positive");
        ensure!(self.population > 0, "population must be at least one");
        ensure!(
            (0.0..=1.0).contains(&self.mutation),
            "mutation must lie in [0, 1], got {}",
            self.mutation
        );
        if let Some(spawn) = self.traffic.iter().find(|t| t.lane >= self.road.lanes) {
            warn!(lane = spawn.lane, lanes = self.road.lanes, "traffic lane clamped to road");
        }
        Ok(())
    }
}

/// Read an [`AppConfig`] from a TOML file; missing keys take their defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Read a JSON-serialized network.
pub fn load_network(path: &Path) -> Result<NeuralNetwork> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read network {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse network {}", path.display()))
}

pub fn save_network(path: &Path, network: &NeuralNetwork) -> Result<()> {
    let json = serde_json::to_string_pretty(network).context("failed to serialize network")?;
    fs::write(path, json).with_context(|| format!("failed to write network {}", path.display()))
}

/// Build the world: road, traffic and a population of autonomous agents.
///
/// The first agent drives `base` unchanged (or a fresh random network when
/// none is given); every other agent gets a copy mutated by `config.mutation`.
pub fn bootstrap_world(config: &AppConfig, base: Option<NeuralNetwork>) -> Result<World> {
    config.validate()?;
    let topology = config.simulation.brain_topology();
    let mut rng = config.simulation.seeded_rng();
    let base = match base {
        Some(network) => {
            ensure!(
                network.topology() == topology,
                "stored network has topology {:?}, configuration needs {:?}",
                network.topology(),
                topology
            );
            network
        }
        None => NeuralNetwork::random(&topology, &mut rng).context("invalid brain topology")?,
    };

    if config.population > 1 && config.simulation.obstacle_scope == ObstacleScope::AllVehicles {
        warn!(
            population = config.population,
            "agents share a spawn point and collide with each other immediately"
        );
    }

    let mut world = World::new(config.simulation.clone(), config.road.borders())
        .context("failed to create world")?;
    for spawn in &config.traffic {
        world.spawn_traffic(config.road.lane_center(spawn.lane), spawn.y);
    }

    let start_x = config.road.lane_center(config.road.middle_lane());
    for index in 0..config.population {
        let mut network = base.clone();
        if index > 0 {
            network.mutate(&mut rng, config.mutation);
        }
        world
            .spawn_autonomous(start_x, config.start_y, network.runner())
            .with_context(|| format!("failed to spawn agent {index}"))?;
    }

    info!(
        agents = config.population,
        traffic = config.traffic.len(),
        topology = ?topology,
        "world bootstrapped"
    );
    Ok(world)
}

fn autonomous_active(world: &World) -> usize {
    world
        .vehicles()
        .filter(|(_, v)| v.mode() == ControlMode::Autonomous && !v.is_damaged())
        .count()
}

/// Step `world` up to `ticks` times, stopping early once every agent is damaged.
pub fn run(world: &mut World, ticks: u64) -> Result<RunReport> {
    let start = world.tick();
    for _ in 0..ticks {
        let events = world.step().context("world step failed")?;
        if !events.newly_damaged.is_empty() {
            debug!(
                tick = events.tick.0,
                damaged = events.newly_damaged.len(),
                "vehicles damaged"
            );
        }
        if events.tick.0 % 100 == 0 {
            let summary = world.summary();
            info!(
                tick = summary.tick.0,
                active = summary.active,
                damaged = summary.damaged,
                leader_y = summary.leader_y,
                "progress"
            );
        }
        if autonomous_active(world) == 0 {
            info!(tick = events.tick.0, "every agent is damaged; stopping early");
            break;
        }
    }
    let report = RunReport::capture(world, world.tick().0 - start.0);
    info!(
        ticks = report.ticks,
        damaged = report.damaged,
        leader_y = report.leader.as_ref().map(|leader| leader.y),
        "run complete"
    );
    Ok(report)
}

/// Network driven by the current leader, if it is a [`NeuralNetwork`].
#[must_use]
pub fn best_network(world: &World) -> Option<NeuralNetwork> {
    let (_, leader) = world.leader()?;
    let brain = leader.autopilot()?.brain();
    downcast_brain::<NeuralNetwork>(brain).cloned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderReport {
    pub id: u64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleReport {
    pub id: u64,
    pub mode: ControlMode,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub damaged: bool,
}

/// Final state of a run, written as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub ticks: u64,
    pub damaged: usize,
    pub leader: Option<LeaderReport>,
    pub vehicles: Vec<VehicleReport>,
}

fn report_id(id: VehicleId) -> u64 {
    id.data().as_ffi()
}

impl RunReport {
    #[must_use]
    pub fn capture(world: &World, ticks: u64) -> Self {
        let vehicles = world
            .vehicles()
            .map(|(id, vehicle)| {
                let pose = vehicle.pose();
                VehicleReport {
                    id: report_id(id),
                    mode: vehicle.mode(),
                    x: pose.x,
                    y: pose.y,
                    angle: pose.angle,
                    speed: vehicle.speed(),
                    damaged: vehicle.is_damaged(),
                }
            })
            .collect();
        Self {
            ticks,
            damaged: world.damaged_count(),
            leader: world.leader().map(|(id, vehicle)| LeaderReport {
                id: report_id(id),
                y: vehicle.pose().y,
            }),
            vehicles,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))
    }
}
