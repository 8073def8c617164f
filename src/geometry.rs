//! Geometry kernels shared by every pass: lines, boxes, the scene domain and
//! the intersection tests whose comparison order all passes agree on.

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

/// Colinear / degenerate rejection threshold shared by all intersection tests
pub const EPSILON: f32 = 1e-7;

pub const TAU: f32 = std::f32::consts::TAU;
pub const INV_TAU: f32 = 1.0 / std::f32::consts::TAU;

// ============================================================================
// Line
// ============================================================================

/// A 2D segment between two distinct endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub a: Vec2,
    pub b: Vec2,
}

impl Line {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }

    pub fn from_array(v: [f32; 4]) -> Self {
        Self {
            a: Vec2::new(v[0], v[1]),
            b: Vec2::new(v[2], v[3]),
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.a.x, self.a.y, self.b.x, self.b.y]
    }

    /// Packed as `(ax, ay, bx, by)`
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.a.x, self.a.y, self.b.x, self.b.y)
    }

    pub fn from_vec4(v: Vec4) -> Self {
        Self {
            a: Vec2::new(v.x, v.y),
            b: Vec2::new(v.z, v.w),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        (self.a + self.b) * 0.5
    }

    /// `a - b`, the same difference the BVH entries carry
    #[inline]
    pub fn delta(&self) -> Vec2 {
        self.a - self.b
    }

    #[inline]
    pub fn length_squared(&self) -> f32 {
        self.delta().length_squared()
    }

    pub fn is_finite(&self) -> bool {
        self.a.is_finite() && self.b.is_finite()
    }

    pub fn aabb(&self) -> Aabb2 {
        Aabb2::new(self.a.min(self.b), self.a.max(self.b))
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            a: self.a + offset,
            b: self.b + offset,
        }
    }

    /// Closest point on the segment to `p`
    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        let ab = self.b - self.a;
        let len_sq = ab.length_squared();
        if len_sq <= EPSILON * EPSILON {
            return self.a;
        }
        let t = ((p - self.a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.a + ab * t
    }

    #[inline]
    pub fn distance_squared_to(&self, p: Vec2) -> f32 {
        (p - self.closest_point(p)).length_squared()
    }

    /// Which side of the line `p` lies on: +1 left of a->b, -1 right, 0 on it
    pub fn side(&self, p: Vec2) -> f32 {
        let c = (self.b - self.a).perp_dot(p - self.a);
        if c.abs() <= EPSILON {
            0.0
        } else {
            c.signum()
        }
    }

    /// Unit normal facing `toward`
    pub fn normal_facing(&self, toward: Vec2) -> Vec2 {
        let n = (self.b - self.a).perp().normalize_or_zero();
        if n.dot(toward - self.a) < 0.0 {
            -n
        } else {
            n
        }
    }
}

// ============================================================================
// Aabb2
// ============================================================================

/// Axis-aligned box, packed as `(xmin, ymin, xmax, ymax)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb2 {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Inverted box that any expansion overrides
    pub fn empty() -> Self {
        Self {
            min: Vec2::splat(f32::INFINITY),
            max: Vec2::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn from_vec4(v: Vec4) -> Self {
        Self {
            min: Vec2::new(v.x, v.y),
            max: Vec2::new(v.z, v.w),
        }
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.min.x, self.min.y, self.max.x, self.max.y)
    }

    #[inline]
    pub fn expand_point(&mut self, p: Vec2) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn grown(&self, amount: f32) -> Self {
        Self {
            min: self.min - Vec2::splat(amount),
            max: self.max + Vec2::splat(amount),
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Squared distance from `p` to the box (0 inside)
    #[inline]
    pub fn distance_squared_to(&self, p: Vec2) -> f32 {
        let d = (self.min - p).max(p - self.max).max(Vec2::ZERO);
        d.length_squared()
    }

    /// Slab test of the segment `origin + delta * t`, `t` in `[0, 1]`.
    /// Returns the entry parameter, or `None` when the segment misses.
    pub fn segment_entry(&self, origin: Vec2, delta: Vec2) -> Option<f32> {
        let mut t_near = 0.0_f32;
        let mut t_far = 1.0_f32;

        for axis in 0..2 {
            let o = origin[axis];
            let d = delta[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];
            if d.abs() <= EPSILON {
                // Parallel to this slab: inside or never
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_near = t_near.max(t0);
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }

        Some(t_near)
    }
}

// ============================================================================
// Domain
// ============================================================================

/// The square region lines, lights and probes live in.
/// Either `[0,1]²` or `[-1,1]²` by convention, but any box works.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub min: Vec2,
    pub max: Vec2,
}

impl Domain {
    pub const UNIT: Self = Self {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    pub const SIGNED: Self = Self {
        min: Vec2::NEG_ONE,
        max: Vec2::ONE,
    };

    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Domain point to normalised `[0,1]²` texture coordinates
    #[inline]
    pub fn to_uv(&self, p: Vec2) -> Vec2 {
        (p - self.min) / self.size()
    }

    /// Normalised texture coordinates to a domain point
    #[inline]
    pub fn from_uv(&self, uv: Vec2) -> Vec2 {
        self.min + uv * self.size()
    }

    /// Centre of texel `(x, y)` of a `width x height` grid spanning the domain
    #[inline]
    pub fn texel_center(&self, x: u32, y: u32, width: u32, height: u32) -> Vec2 {
        self.from_uv(Vec2::new(
            (x as f32 + 0.5) / width as f32,
            (y as f32 + 0.5) / height as f32,
        ))
    }

    pub fn aabb(&self) -> Aabb2 {
        Aabb2::new(self.min, self.max)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::UNIT
    }
}

// ============================================================================
// Intersection kernels
// ============================================================================

/// Segment / segment test of `origin + delta * t` against `a -> b`.
/// Returns `(t, u)` with `t` along the first segment and `u` along `a -> b`,
/// both in `[0, 1]`. Parallel and colinear pairs never hit.
#[inline]
pub fn segment_intersection(origin: Vec2, delta: Vec2, a: Vec2, b: Vec2) -> Option<(f32, f32)> {
    let s = b - a;
    let denom = delta.perp_dot(s);
    if denom.abs() <= EPSILON {
        return None;
    }
    let ao = a - origin;
    let t = ao.perp_dot(s) / denom;
    let u = ao.perp_dot(delta) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Does the segment from the light (origin) to the light-local point `p`
/// cross the light-local line `(ax, ay, bx, by)`?
///
/// Both parameters are scaled by `|d|` so the comparison needs no division:
/// the hit must start at or after `p` (within `EPSILON`) and stop short of
/// the light and of the line's second endpoint.
#[inline]
pub fn crosses_light_segment(p: Vec2, line: Vec4) -> bool {
    let c = Vec2::new(line.x, line.y);
    let d = Vec2::new(line.z, line.w);
    if c == d {
        return false;
    }

    let ab = p;
    let cd = c - d;
    let ac = p - c;

    let det = ab.x * cd.y - ab.y * cd.x;
    if det == 0.0 {
        return false;
    }
    let u = det.signum() * (ac.x * ab.y - ac.y * ab.x);
    let t = det.signum() * (ac.x * cd.y - ac.y * cd.x);

    u.min(t) >= -EPSILON && u.max(t) < det.abs()
}

/// Distance from the origin, along `dir`, to the infinite line through the
/// light-local segment. `None` if the ray runs parallel to it.
#[inline]
pub fn ray_line_distance(dir: Vec2, line: Vec4) -> Option<f32> {
    let a = Vec2::new(line.x, line.y);
    let diff = Vec2::new(line.z, line.w) - a;
    let denom = diff.x * dir.y - diff.y * dir.x;
    if denom.abs() <= EPSILON {
        return None;
    }
    let u = (dir.x * a.y - dir.y * a.x) / denom;
    Some((a + diff * u).length())
}

/// Polar angle in turns, `[-0.5, 0.5]`
#[inline]
pub fn polar_angle(v: Vec2) -> f32 {
    v.y.atan2(v.x) * INV_TAU
}

/// Unit direction for an angle in turns
#[inline]
pub fn turn_direction(theta: f32) -> Vec2 {
    let (s, c) = (TAU * theta).sin_cos();
    Vec2::new(c, s)
}

/// Check if a point is inside a polygon using ray casting algorithm
pub fn point_in_polygon(p: Vec2, vertices: &[Vec2]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;

    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];

        // Skip horizontal edges (avoid division by zero)
        let dy = vj.y - vi.y;
        if dy.abs() > f32::EPSILON && ((vi.y > p.y) != (vj.y > p.y)) {
            let x_intersect = (vj.x - vi.x) * (p.y - vi.y) / dy + vi.x;
            if p.x < x_intersect {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Twice the signed area; positive for counter-clockwise winding
pub fn signed_area2(vertices: &[Vec2]) -> f32 {
    let n = vertices.len();
    (0..n)
        .map(|i| vertices[i].perp_dot(vertices[(i + 1) % n]))
        .sum()
}
