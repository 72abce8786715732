use selfdrive_core::{
    BrainRunner, CONTROL_OUTPUTS, ControlMode, Controls, ObstacleScope, Point, Segment,
    ShapeError, SimulationConfig, Tick, World, WorldError,
};
use std::any::Any;

#[derive(Clone)]
struct ConstantBrain {
    inputs: usize,
    outputs: [f64; CONTROL_OUTPUTS],
}

impl ConstantBrain {
    fn cruise(inputs: usize) -> Box<dyn BrainRunner> {
        Box::new(Self {
            inputs,
            outputs: [1.0, 0.0, 0.0, 0.0],
        })
    }

    fn parked(inputs: usize) -> Box<dyn BrainRunner> {
        Box::new(Self {
            inputs,
            outputs: [0.0; CONTROL_OUTPUTS],
        })
    }
}

impl BrainRunner for ConstantBrain {
    fn kind(&self) -> &'static str {
        "test.constant"
    }

    fn input_size(&self) -> usize {
        self.inputs
    }

    fn output_size(&self) -> usize {
        CONTROL_OUTPUTS
    }

    fn tick(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError> {
        if inputs.len() != self.inputs {
            return Err(ShapeError::InputLength {
                expected: self.inputs,
                actual: inputs.len(),
            });
        }
        Ok(self.outputs.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Advertises the right width but returns too many outputs at runtime.
struct ChattyBrain;

impl BrainRunner for ChattyBrain {
    fn kind(&self) -> &'static str {
        "test.chatty"
    }

    fn input_size(&self) -> usize {
        SimulationConfig::default().sensor.ray_count
    }

    fn output_size(&self) -> usize {
        CONTROL_OUTPUTS
    }

    fn tick(&mut self, _inputs: &[f64]) -> Result<Vec<f64>, ShapeError> {
        Ok(vec![1.0; CONTROL_OUTPUTS + 1])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn road_borders() -> Vec<Segment> {
    vec![
        Segment::new(Point::new(10.0, -100_000.0), Point::new(10.0, 100_000.0)),
        Segment::new(Point::new(190.0, -100_000.0), Point::new(190.0, 100_000.0)),
    ]
}

fn rays() -> usize {
    SimulationConfig::default().sensor.ray_count
}

#[test]
fn identical_worlds_advance_identically() {
    let build = || {
        let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
        world
            .spawn_autonomous(100.0, 100.0, ConstantBrain::cruise(rays()))
            .expect("agent");
        world.spawn_traffic(100.0, -200.0);
        world.spawn_traffic(40.0, -400.0);
        world
    };
    let mut world_a = build();
    let mut world_b = build();

    for _ in 0..60 {
        world_a.step().expect("step a");
        world_b.step().expect("step b");
    }

    assert_eq!(world_a.tick(), Tick(60));
    let poses_a: Vec<_> = world_a.vehicles().map(|(_, v)| v.pose()).collect();
    let poses_b: Vec<_> = world_b.vehicles().map(|(_, v)| v.pose()).collect();
    assert_eq!(poses_a, poses_b);
}

#[test]
fn rear_end_collision_damages_both_in_the_same_tick() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    let agent = world
        .spawn_autonomous(100.0, 200.0, ConstantBrain::cruise(rays()))
        .expect("agent");
    let traffic = world.spawn_traffic(105.0, 100.0);

    let mut hit = None;
    for _ in 0..400 {
        let events = world.step().expect("step");
        if !events.newly_damaged.is_empty() {
            hit = Some(events);
            break;
        }
    }

    let events = hit.expect("agent should catch up with slower traffic");
    assert!(events.newly_damaged.contains(&agent));
    assert!(events.newly_damaged.contains(&traffic));
    assert_eq!(world.damaged_count(), 2);
}

#[test]
fn traffic_only_scope_spares_traffic_and_ghosts_agents() {
    let config = SimulationConfig {
        obstacle_scope: ObstacleScope::TrafficOnly,
        ..SimulationConfig::default()
    };
    let mut world = World::new(config, road_borders()).expect("world");
    let first = world
        .spawn_autonomous(100.0, 100.0, ConstantBrain::parked(rays()))
        .expect("first");
    let second = world
        .spawn_autonomous(105.0, 110.0, ConstantBrain::parked(rays()))
        .expect("second");
    let traffic = world.spawn_traffic(110.0, 130.0);

    let events = world.step().expect("step");
    assert!(events.newly_damaged.contains(&first));
    assert!(events.newly_damaged.contains(&second));
    assert!(!events.newly_damaged.contains(&traffic));

    let config = SimulationConfig {
        obstacle_scope: ObstacleScope::TrafficOnly,
        ..SimulationConfig::default()
    };
    let mut ghosts = World::new(config, road_borders()).expect("world");
    ghosts
        .spawn_autonomous(100.0, 100.0, ConstantBrain::parked(rays()))
        .expect("first");
    ghosts
        .spawn_autonomous(105.0, 110.0, ConstantBrain::parked(rays()))
        .expect("second");
    let events = ghosts.step().expect("step");
    assert!(events.newly_damaged.is_empty());
}

#[test]
fn overlapping_agents_collide_under_default_scope() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    world
        .spawn_autonomous(100.0, 100.0, ConstantBrain::parked(rays()))
        .expect("first");
    world
        .spawn_autonomous(105.0, 110.0, ConstantBrain::parked(rays()))
        .expect("second");
    let events = world.step().expect("step");
    assert_eq!(events.newly_damaged.len(), 2);
}

#[test]
fn damaged_vehicles_stay_frozen() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    let id = world
        .spawn_autonomous(20.0, 100.0, ConstantBrain::cruise(rays()))
        .expect("agent");

    world.step().expect("step");
    let vehicle = world.vehicle(id).expect("vehicle");
    assert!(vehicle.is_damaged());
    let frozen = vehicle.pose();

    for _ in 0..3 {
        let events = world.step().expect("step");
        assert!(events.newly_damaged.is_empty());
        assert_eq!(world.vehicle(id).expect("vehicle").pose(), frozen);
    }
    assert_eq!(world.summary().damaged, 1);
    assert_eq!(world.summary().active, 0);
}

#[test]
fn human_vehicle_follows_manual_controls() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    let id = world.spawn_human(100.0, 100.0);
    let traffic = world.spawn_traffic(100.0, -500.0);

    assert!(world.steer(id, Controls::cruise()).expect("known vehicle"));
    assert!(!world.steer(traffic, Controls::idle()).expect("known vehicle"));

    for _ in 0..10 {
        world.step().expect("step");
    }
    let vehicle = world.vehicle(id).expect("vehicle");
    assert_eq!(vehicle.mode(), ControlMode::Human);
    assert!((vehicle.speed() - 1.5).abs() < 1e-9);
    assert!(vehicle.pose().y < 100.0);
    assert!(vehicle.sensor().is_none());
}

#[test]
fn leader_is_the_furthest_autonomous_vehicle() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    let slow = world
        .spawn_autonomous(50.0, 100.0, ConstantBrain::parked(rays()))
        .expect("slow");
    let fast = world
        .spawn_autonomous(150.0, 100.0, ConstantBrain::cruise(rays()))
        .expect("fast");
    world.spawn_traffic(100.0, -1_000.0);

    for _ in 0..5 {
        world.step().expect("step");
    }
    let (leader, _) = world.leader().expect("leader");
    assert_eq!(leader, fast);
    assert_ne!(leader, slow);
    assert_eq!(world.summary().leader, Some(fast));
}

#[test]
fn mismatched_brain_is_rejected_at_spawn() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    let err = world
        .spawn_autonomous(100.0, 100.0, ConstantBrain::cruise(rays() + 2))
        .expect_err("shape mismatch");
    assert!(matches!(
        err,
        WorldError::Shape(ShapeError::SensorBrainMismatch { .. })
    ));
    assert_eq!(world.vehicle_count(), 0);
}

#[test]
fn brain_output_overflow_halts_the_world() {
    let mut world = World::new(SimulationConfig::default(), road_borders()).expect("world");
    world
        .spawn_autonomous(100.0, 100.0, Box::new(ChattyBrain))
        .expect("advertised shape matches");
    let traffic = world.spawn_traffic(40.0, 100.0);
    let err = world.step().expect_err("runtime shape violation");
    assert!(matches!(
        err,
        WorldError::Shape(ShapeError::OutputLength { .. })
    ));
    assert!(world.is_halted());
    assert_eq!(world.tick(), Tick::zero());
    assert!(world.history().is_empty());

    let after_failure = world.vehicle(traffic).expect("traffic").pose();
    for _ in 0..3 {
        let err = world.step().expect_err("halted world");
        assert!(matches!(err, WorldError::Halted(Tick(0))));
    }
    assert_eq!(world.vehicle(traffic).expect("traffic").pose(), after_failure);
    assert_eq!(world.tick(), Tick::zero());
}
