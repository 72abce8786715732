//! Segment and polygon intersection primitives shared by collision checks and sensors.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Denominator magnitude below which two segments are treated as parallel.
pub const PARALLEL_EPSILON: f64 = 1e-9;

/// Real-valued 2D coordinate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Linear interpolation towards `other`; `t = 0` yields `self`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self {
            x: lerp(self.x, other.x, t),
            y: lerp(self.y, other.y, t),
        }
    }
}

/// Position plus heading. Angle 0 points "up" (towards negative y).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

impl Pose {
    #[must_use]
    pub const fn new(x: f64, y: f64, angle: f64) -> Self {
        Self { x, y, angle }
    }

    #[must_use]
    pub const fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Point reached by travelling `distance` from this pose along `heading`.
    #[must_use]
    pub fn project(&self, heading: f64, distance: f64) -> Point {
        Point::new(
            self.x - heading.sin() * distance,
            self.y - heading.cos() * distance,
        )
    }
}

/// Ordered pair of points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

impl Segment {
    #[must_use]
    pub const fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    /// Intersection with `other`, parametrised along this segment.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Intersection> {
        segments_intersect(self.a, self.b, other.a, other.b)
    }
}

/// Crossing point of two segments plus its normalised distance along the first one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Intersection {
    pub point: Point,
    /// Parameter in `[0, 1]` along the first segment.
    pub offset: f64,
}

/// Convex quadrilateral; edges run between consecutive corners and close last -> first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Polygon {
    corners: [Point; 4],
}

impl Polygon {
    #[must_use]
    pub const fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Oriented rectangle of `width` x `height` centred on `pose`.
    ///
    /// Corners sit on the circle of the half diagonal at `angle ± α` and
    /// `π + angle ± α`, with `α = atan2(width, height)`.
    #[must_use]
    pub fn oriented_box(pose: Pose, width: f64, height: f64) -> Self {
        let radius = width.hypot(height) / 2.0;
        let alpha = width.atan2(height);
        let corner = |heading: f64| pose.project(heading, radius);
        Self::new([
            corner(pose.angle - alpha),
            corner(pose.angle + alpha),
            corner(PI + pose.angle - alpha),
            corner(PI + pose.angle + alpha),
        ])
    }

    #[must_use]
    pub const fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        let n = self.corners.len();
        (0..n).map(move |i| Segment::new(self.corners[i], self.corners[(i + 1) % n]))
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        polygons_intersect(self, other)
    }

    /// True when any edge crosses `segment`.
    #[must_use]
    pub fn touches_segment(&self, segment: &Segment) -> bool {
        self.edges()
            .any(|edge| segments_intersect(edge.a, edge.b, segment.a, segment.b).is_some())
    }
}

#[must_use]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Intersection of segments AB and CD.
///
/// Returns the crossing point and its parameter along AB when both
/// parameters lie in `[0, 1]`. Parallel and collinear pairs report `None`.
#[must_use]
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> Option<Intersection> {
    let t_top = (d.x - c.x) * (a.y - c.y) - (d.y - c.y) * (a.x - c.x);
    let u_top = (c.y - a.y) * (a.x - b.x) - (c.x - a.x) * (a.y - b.y);
    let bottom = (d.y - c.y) * (b.x - a.x) - (d.x - c.x) * (b.y - a.y);

    if bottom.abs() < PARALLEL_EPSILON {
        return None;
    }

    let t = t_top / bottom;
    let u = u_top / bottom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(Intersection {
            point: a.lerp(b, t),
            offset: t,
        })
    } else {
        None
    }
}

/// True iff any edge of `p` crosses any edge of `q`. Full containment without
/// crossing edges is not reported.
#[must_use]
pub fn polygons_intersect(p: &Polygon, q: &Polygon) -> bool {
    p.edges().any(|edge| q.touches_segment(&edge))
}
