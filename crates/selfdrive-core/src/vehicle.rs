//! Vehicle kinematics, footprint derivation and damage assessment.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::geometry::{Polygon, Pose, Segment};
use crate::sensor::Sensor;
use crate::{BrainRunner, CONTROL_OUTPUTS, ShapeError};

/// Who supplies a vehicle's controls each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ControlMode {
    /// Controls are set from outside through [`Vehicle::steer`].
    #[default]
    Human,
    /// Fixed script: always accelerating straight ahead.
    Scripted,
    /// Controls are overwritten by the brain after every sensor pass.
    Autonomous,
}

/// Control booleans consumed by the integration step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Controls {
    pub forward: bool,
    pub left: bool,
    pub right: bool,
    pub reverse: bool,
}

impl Controls {
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            forward: false,
            left: false,
            right: false,
            reverse: false,
        }
    }

    #[must_use]
    pub const fn cruise() -> Self {
        Self {
            forward: true,
            ..Self::idle()
        }
    }

    /// Initial controls for a freshly spawned vehicle.
    #[must_use]
    pub const fn for_mode(mode: ControlMode) -> Self {
        match mode {
            ControlMode::Scripted => Self::cruise(),
            ControlMode::Human | ControlMode::Autonomous => Self::idle(),
        }
    }

    /// Decode brain outputs in `[forward, left, right, reverse]` order; any
    /// nonzero value is set.
    #[must_use]
    pub fn from_outputs(outputs: &[f64]) -> Self {
        let flag = |idx: usize| outputs.get(idx).is_some_and(|value| *value != 0.0);
        Self {
            forward: flag(0),
            left: flag(1),
            right: flag(2),
            reverse: flag(3),
        }
    }
}

/// Body and engine parameters fixed at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VehicleParams {
    pub width: f64,
    pub height: f64,
    pub acceleration: f64,
    pub max_speed: f64,
    pub friction: f64,
    /// Heading change per tick while steering, in radians.
    pub steer_rate: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            width: 30.0,
            height: 50.0,
            acceleration: 0.2,
            max_speed: 3.0,
            friction: 0.05,
            steer_rate: 0.03,
        }
    }
}

/// Sensor paired with the brain that reads it.
pub struct Autopilot {
    sensor: Sensor,
    brain: Box<dyn BrainRunner>,
    last_outputs: Vec<f64>,
}

impl fmt::Debug for Autopilot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autopilot")
            .field("sensor", &self.sensor)
            .field("brain", &self.brain.kind())
            .field("last_outputs", &self.last_outputs)
            .finish()
    }
}

impl Autopilot {
    /// Pair `sensor` with `brain`, rejecting mismatched widths.
    pub fn new(sensor: Sensor, brain: Box<dyn BrainRunner>) -> Result<Self, ShapeError> {
        if sensor.ray_count() != brain.input_size() {
            return Err(ShapeError::SensorBrainMismatch {
                rays: sensor.ray_count(),
                inputs: brain.input_size(),
            });
        }
        if brain.output_size() != CONTROL_OUTPUTS {
            return Err(ShapeError::OutputLength {
                expected: CONTROL_OUTPUTS,
                actual: brain.output_size(),
            });
        }
        Ok(Self {
            sensor,
            brain,
            last_outputs: vec![0.0; CONTROL_OUTPUTS],
        })
    }

    #[must_use]
    pub const fn sensor(&self) -> &Sensor {
        &self.sensor
    }

    #[must_use]
    pub fn brain(&self) -> &dyn BrainRunner {
        self.brain.as_ref()
    }

    pub fn brain_mut(&mut self) -> &mut dyn BrainRunner {
        self.brain.as_mut()
    }

    /// Brain outputs from the latest sensor pass.
    #[must_use]
    pub fn last_outputs(&self) -> &[f64] {
        &self.last_outputs
    }

    fn perceive(
        &mut self,
        pose: Pose,
        borders: &[Segment],
        traffic: &[Polygon],
    ) -> Result<Controls, ShapeError> {
        self.sensor.update(pose, borders, traffic);
        let outputs = self.brain.tick(&self.sensor.normalized_inputs())?;
        if outputs.len() != CONTROL_OUTPUTS {
            return Err(ShapeError::OutputLength {
                expected: CONTROL_OUTPUTS,
                actual: outputs.len(),
            });
        }
        let controls = Controls::from_outputs(&outputs);
        self.last_outputs = outputs;
        Ok(controls)
    }
}

/// One simulated car.
#[derive(Debug)]
pub struct Vehicle {
    pose: Pose,
    params: VehicleParams,
    speed: f64,
    damaged: bool,
    polygon: Polygon,
    controls: Controls,
    mode: ControlMode,
    autopilot: Option<Autopilot>,
}

impl Vehicle {
    fn with_mode(x: f64, y: f64, params: VehicleParams, mode: ControlMode) -> Self {
        let pose = Pose::new(x, y, 0.0);
        Self {
            pose,
            params,
            speed: 0.0,
            damaged: false,
            polygon: Polygon::oriented_box(pose, params.width, params.height),
            controls: Controls::for_mode(mode),
            mode,
            autopilot: None,
        }
    }

    /// Externally driven vehicle.
    #[must_use]
    pub fn human(x: f64, y: f64, params: VehicleParams) -> Self {
        Self::with_mode(x, y, params, ControlMode::Human)
    }

    /// Traffic vehicle cruising straight ahead.
    #[must_use]
    pub fn scripted(x: f64, y: f64, params: VehicleParams) -> Self {
        Self::with_mode(x, y, params, ControlMode::Scripted)
    }

    /// Brain-driven vehicle.
    #[must_use]
    pub fn autonomous(x: f64, y: f64, params: VehicleParams, autopilot: Autopilot) -> Self {
        Self::with_mode(x, y, params, ControlMode::Autonomous).with_autopilot(autopilot)
    }

    /// Attach an autopilot. Its outputs only drive the vehicle in autonomous mode.
    #[must_use]
    pub fn with_autopilot(mut self, autopilot: Autopilot) -> Self {
        self.autopilot = Some(autopilot);
        self
    }

    #[must_use]
    pub const fn pose(&self) -> Pose {
        self.pose
    }

    #[must_use]
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    #[must_use]
    pub const fn params(&self) -> &VehicleParams {
        &self.params
    }

    #[must_use]
    pub const fn is_damaged(&self) -> bool {
        self.damaged
    }

    #[must_use]
    pub const fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    #[must_use]
    pub const fn controls(&self) -> Controls {
        self.controls
    }

    #[must_use]
    pub const fn mode(&self) -> ControlMode {
        self.mode
    }

    #[must_use]
    pub const fn autopilot(&self) -> Option<&Autopilot> {
        self.autopilot.as_ref()
    }

    pub fn autopilot_mut(&mut self) -> Option<&mut Autopilot> {
        self.autopilot.as_mut()
    }

    #[must_use]
    pub fn sensor(&self) -> Option<&Sensor> {
        self.autopilot.as_ref().map(Autopilot::sensor)
    }

    /// Set controls for a human-driven vehicle. Other modes ignore the request.
    pub fn steer(&mut self, controls: Controls) -> bool {
        if self.mode != ControlMode::Human {
            warn!(mode = ?self.mode, "ignoring manual controls for non-human vehicle");
            return false;
        }
        self.controls = controls;
        true
    }

    /// Advance one tick against `borders` and the other vehicles in `traffic`.
    pub fn update(&mut self, borders: &[Segment], traffic: &[Vehicle]) -> Result<(), ShapeError> {
        let obstacles: Vec<Polygon> = traffic.iter().map(|other| other.polygon).collect();
        self.integrate();
        self.assess(borders, &obstacles)?;
        Ok(())
    }

    /// Motion and footprint; frozen once damaged.
    pub(crate) fn integrate(&mut self) {
        if self.damaged {
            return;
        }
        self.advance_motion();
        self.polygon = Polygon::oriented_box(self.pose, self.params.width, self.params.height);
    }

    /// Damage check, then sensing and brain evaluation. Returns true when this
    /// call moved the vehicle into the damaged state.
    pub(crate) fn assess(
        &mut self,
        borders: &[Segment],
        obstacles: &[Polygon],
    ) -> Result<bool, ShapeError> {
        let mut newly_damaged = false;
        if !self.damaged && self.collides(borders, obstacles) {
            self.damaged = true;
            newly_damaged = true;
            debug!(x = self.pose.x, y = self.pose.y, mode = ?self.mode, "vehicle damaged");
        }

        if let Some(autopilot) = self.autopilot.as_mut() {
            let decided = autopilot.perceive(self.pose, borders, obstacles)?;
            if self.mode == ControlMode::Autonomous {
                self.controls = decided;
            }
        }
        Ok(newly_damaged)
    }

    fn collides(&self, borders: &[Segment], obstacles: &[Polygon]) -> bool {
        borders
            .iter()
            .any(|border| self.polygon.touches_segment(border))
            || obstacles.iter().any(|other| self.polygon.intersects(other))
    }

    fn advance_motion(&mut self) {
        let VehicleParams {
            acceleration,
            max_speed,
            friction,
            steer_rate,
            ..
        } = self.params;

        if self.controls.forward {
            self.speed += acceleration;
        }
        if self.controls.reverse {
            self.speed -= acceleration;
        }

        if self.speed > max_speed {
            self.speed = max_speed;
        }
        if self.speed < -max_speed / 2.0 {
            self.speed = -max_speed / 2.0;
        }

        if self.speed > 0.0 {
            self.speed -= friction;
        }
        if self.speed < 0.0 {
            self.speed += friction;
        }
        if self.speed.abs() < friction {
            self.speed = 0.0;
        }

        if self.speed != 0.0 {
            let flip = self.speed.signum();
            if self.controls.left {
                self.pose.angle += steer_rate * flip;
            }
            if self.controls.right {
                self.pose.angle -= steer_rate * flip;
            }
        }

        self.pose.x -= self.pose.angle.sin() * self.speed;
        self.pose.y -= self.pose.angle.cos() * self.speed;
    }
}
