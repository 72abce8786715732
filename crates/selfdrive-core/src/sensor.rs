//! Directional ray fan reporting the nearest obstacle along each line of sight.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

use crate::geometry::{Intersection, Polygon, Pose, Segment, lerp, segments_intersect};

/// Static layout of a sensor's ray fan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Number of rays; also the brain's input width.
    pub ray_count: usize,
    /// Total angle covered by the fan, in radians.
    pub ray_spread: f64,
    /// Maximum range of every ray in world units.
    pub ray_length: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            ray_count: 5,
            ray_spread: FRAC_PI_2,
            ray_length: 150.0,
        }
    }
}

/// Ray fan plus the readings from the most recent update.
#[derive(Debug, Clone, Serialize)]
pub struct Sensor {
    config: SensorConfig,
    rays: Vec<Segment>,
    readings: Vec<Option<Intersection>>,
}

impl Sensor {
    #[must_use]
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            rays: Vec::with_capacity(config.ray_count),
            readings: vec![None; config.ray_count],
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SensorConfig {
        &self.config
    }

    #[must_use]
    pub const fn ray_count(&self) -> usize {
        self.config.ray_count
    }

    /// Rays cast by the last update, left to right.
    #[must_use]
    pub fn rays(&self) -> &[Segment] {
        &self.rays
    }

    /// One entry per ray; `None` when nothing lies within range.
    #[must_use]
    pub fn readings(&self) -> &[Option<Intersection>] {
        &self.readings
    }

    /// Rays for `pose`, ordered from the leftmost (`+spread/2`) to the rightmost.
    #[must_use]
    pub fn cast_rays(&self, pose: Pose) -> Vec<Segment> {
        let SensorConfig {
            ray_count,
            ray_spread,
            ray_length,
        } = self.config;
        let origin = pose.position();
        (0..ray_count)
            .map(|i| {
                let t = if ray_count == 1 {
                    0.5
                } else {
                    i as f64 / (ray_count - 1) as f64
                };
                let heading = lerp(ray_spread / 2.0, -ray_spread / 2.0, t) + pose.angle;
                Segment::new(origin, pose.project(heading, ray_length))
            })
            .collect()
    }

    /// Recast every ray from `pose` and keep the closest hit against the
    /// border segments and the edges of every traffic polygon.
    pub fn update(&mut self, pose: Pose, borders: &[Segment], traffic: &[Polygon]) {
        self.rays = self.cast_rays(pose);
        self.readings = self
            .rays
            .iter()
            .map(|ray| nearest_hit(ray, borders, traffic))
            .collect();
    }

    /// Brain inputs: `1 - offset` per ray so closer obstacles read larger, 0 when clear.
    #[must_use]
    pub fn normalized_inputs(&self) -> Vec<f64> {
        self.readings
            .iter()
            .map(|reading| reading.map_or(0.0, |hit| 1.0 - hit.offset))
            .collect()
    }
}

fn nearest_hit(ray: &Segment, borders: &[Segment], traffic: &[Polygon]) -> Option<Intersection> {
    let border_hits = borders
        .iter()
        .filter_map(|border| segments_intersect(ray.a, ray.b, border.a, border.b));
    let traffic_hits = traffic
        .iter()
        .flat_map(Polygon::edges)
        .filter_map(|edge| segments_intersect(ray.a, ray.b, edge.a, edge.b));
    border_hits
        .chain(traffic_hits)
        .min_by_key(|hit| OrderedFloat(hit.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use std::f64::consts::FRAC_PI_4;

    fn wall(y: f64, half_width: f64) -> Segment {
        Segment::new(Point::new(-half_width, y), Point::new(half_width, y))
    }

    #[test]
    fn rays_fan_left_to_right_around_heading() {
        let sensor = Sensor::new(SensorConfig {
            ray_count: 3,
            ray_spread: FRAC_PI_2,
            ray_length: 100.0,
        });
        let rays = sensor.cast_rays(Pose::new(0.0, 0.0, 0.0));
        assert_eq!(rays.len(), 3);
        // Positive heading turns towards negative x.
        assert!(rays[0].b.x < 0.0);
        assert!(rays[1].b.x.abs() < 1e-9);
        assert!((rays[1].b.y + 100.0).abs() < 1e-9);
        assert!(rays[2].b.x > 0.0);
        let expected = 100.0 * FRAC_PI_4.sin();
        assert!((rays[2].b.x - expected).abs() < 1e-9);
    }

    #[test]
    fn single_ray_points_straight_ahead() {
        let sensor = Sensor::new(SensorConfig {
            ray_count: 1,
            ray_spread: FRAC_PI_2,
            ray_length: 50.0,
        });
        let rays = sensor.cast_rays(Pose::new(10.0, 10.0, 0.0));
        assert_eq!(rays.len(), 1);
        assert!((rays[0].b.x - 10.0).abs() < 1e-9);
        assert!((rays[0].b.y + 40.0).abs() < 1e-9);
    }

    #[test]
    fn wall_at_half_range_reads_half_offset() {
        let mut sensor = Sensor::new(SensorConfig {
            ray_count: 3,
            ray_spread: FRAC_PI_2,
            ray_length: 150.0,
        });
        sensor.update(Pose::new(0.0, 0.0, 0.0), &[wall(-75.0, 10.0)], &[]);

        let readings = sensor.readings();
        assert_eq!(readings.len(), 3);
        assert!(readings[0].is_none());
        assert!(readings[2].is_none());
        let center = readings[1].expect("center ray hits the wall");
        assert!((center.offset - 0.5).abs() < 1e-9);
        assert!((center.point.y + 75.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_obstacle_wins() {
        let mut sensor = Sensor::new(SensorConfig {
            ray_count: 1,
            ray_spread: 0.0,
            ray_length: 100.0,
        });
        let blocker = Polygon::new([
            Point::new(-5.0, -30.0),
            Point::new(5.0, -30.0),
            Point::new(5.0, -20.0),
            Point::new(-5.0, -20.0),
        ]);
        sensor.update(Pose::new(0.0, 0.0, 0.0), &[wall(-80.0, 10.0)], &[blocker]);
        let hit = sensor.readings()[0].expect("hit");
        assert!((hit.offset - 0.2).abs() < 1e-9);
    }

    #[test]
    fn normalized_inputs_invert_offsets() {
        let mut sensor = Sensor::new(SensorConfig {
            ray_count: 3,
            ray_spread: FRAC_PI_2,
            ray_length: 150.0,
        });
        sensor.update(Pose::new(0.0, 0.0, 0.0), &[wall(-75.0, 10.0)], &[]);
        let inputs = sensor.normalized_inputs();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0], 0.0);
        assert!((inputs[1] - 0.5).abs() < 1e-9);
        assert_eq!(inputs[2], 0.0);
    }

    #[test]
    fn update_replaces_previous_readings() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.update(Pose::new(0.0, 0.0, 0.0), &[wall(-75.0, 200.0)], &[]);
        assert!(sensor.readings().iter().any(Option::is_some));
        sensor.update(Pose::new(0.0, 0.0, 0.0), &[], &[]);
        assert!(sensor.readings().iter().all(Option::is_none));
        assert_eq!(sensor.readings().len(), sensor.ray_count());
    }
}
