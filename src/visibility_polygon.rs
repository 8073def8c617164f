//! Visibility polygon of a light from its polar depth row
//!
//! One vertex per polar column, stored in an arena as a cyclic
//! doubly-linked list. Simplification unlinks vertices in place; the cycle
//! stays closed through index equality and removed slots are never reused.

use glam::Vec2;

use crate::geometry::{point_in_polygon, signed_area2, turn_direction, Aabb2};
use crate::light::PointLight;
use crate::polar::{column_angle, PolarLayer};

/// Sentinel for "no vertex"
pub const NIL: u32 = u32::MAX;

/// Relative tolerance for merging and colinearity tests
const MERGE_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vertex {
    position: Vec2,
    prev: u32,
    next: u32,
    live: bool,
}

/// Star-shaped polygon around a light
///
/// Built clockwise in domain coordinates with no duplicate or colinear
/// consecutive vertices.
#[derive(Debug, Clone)]
pub struct VisibilityPolygon {
    center: Vec2,
    vertices: Vec<Vertex>,
    head: u32,
    len: usize,
}

impl VisibilityPolygon {
    /// Build from depth row `row` of `layer`, clamping every distance to
    /// the light radius
    pub fn from_polar_row(layer: &PolarLayer, row: u32, light: &PointLight) -> Self {
        let width = layer.depth.width();
        // Columns run counter-clockwise; walk them backwards
        let points = (0..width as i32).rev().map(|c| {
            let d = layer.distance_at(row, c).min(light.radius);
            light.position + turn_direction(column_angle(c, width)) * d
        });
        let mut polygon = Self::from_points(light.position, points);
        let removed = polygon.simplify();
        log::debug!("visibility polygon: {} vertices, {} merged", polygon.len(), removed);
        polygon
    }

    /// Link `points` into a closed cycle around `center`. A
    /// counter-clockwise input is relinked clockwise.
    pub fn from_points(center: Vec2, points: impl IntoIterator<Item = Vec2>) -> Self {
        let mut vertices: Vec<Vertex> = points
            .into_iter()
            .map(|position| Vertex {
                position,
                prev: NIL,
                next: NIL,
                live: true,
            })
            .collect();
        let n = vertices.len() as u32;
        for (i, v) in vertices.iter_mut().enumerate() {
            let i = i as u32;
            v.prev = (i + n - 1) % n;
            v.next = (i + 1) % n;
        }
        let mut polygon = Self {
            center,
            len: vertices.len(),
            head: if n == 0 { NIL } else { 0 },
            vertices,
        };
        if polygon.signed_area2() > 0.0 {
            polygon.flip_winding();
        }
        polygon
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live vertices in cycle order starting at the head
    pub fn points(&self) -> Vec<Vec2> {
        let mut out = Vec::with_capacity(self.len);
        let mut i = self.head;
        while i != NIL && out.len() < self.len {
            let v = &self.vertices[i as usize];
            out.push(v.position);
            i = v.next;
            if i == self.head {
                break;
            }
        }
        out
    }

    fn unlink(&mut self, i: u32) {
        let Vertex { prev, next, .. } = self.vertices[i as usize];
        self.vertices[prev as usize].next = next;
        self.vertices[next as usize].prev = prev;
        self.vertices[i as usize].live = false;
        if self.head == i {
            self.head = next;
        }
        self.len -= 1;
    }

    /// Drop coincident vertices and vertices lying on the line through
    /// their neighbours. Stops at a triangle.
    pub fn simplify(&mut self) -> usize {
        let before = self.len;
        let scale = self
            .points()
            .iter()
            .map(|p| (*p - self.center).length_squared())
            .fold(0.0_f32, f32::max)
            .max(MERGE_TOLERANCE);
        let tolerance = MERGE_TOLERANCE * scale;

        let mut changed = true;
        while changed && self.len > 3 {
            changed = false;
            for i in 0..self.vertices.len() as u32 {
                if self.len <= 3 {
                    break;
                }
                let v = self.vertices[i as usize];
                if !v.live {
                    continue;
                }
                let prev = self.vertices[v.prev as usize].position;
                let next = self.vertices[v.next as usize].position;
                let duplicate = (v.position - next).length_squared() <= tolerance;
                let colinear = (v.position - prev).perp_dot(next - v.position).abs() <= tolerance
                    && (v.position - prev).dot(next - v.position) >= 0.0;
                if duplicate || colinear {
                    self.unlink(i);
                    changed = true;
                }
            }
        }
        before - self.len
    }

    /// Twice the signed area; positive when counter-clockwise
    pub fn signed_area2(&self) -> f32 {
        signed_area2(&self.points())
    }

    fn flip_winding(&mut self) {
        for v in self.vertices.iter_mut().filter(|v| v.live) {
            std::mem::swap(&mut v.prev, &mut v.next);
        }
    }

    /// Fan of triangles around the light
    pub fn triangles(&self) -> Vec<[Vec2; 3]> {
        let points = self.points();
        let n = points.len();
        if n < 2 {
            return Vec::new();
        }
        (0..n)
            .map(|i| [self.center, points[i], points[(i + 1) % n]])
            .filter(|t| (t[1] - t[0]).perp_dot(t[2] - t[0]) != 0.0)
            .collect()
    }

    pub fn contains(&self, p: Vec2) -> bool {
        point_in_polygon(p, &self.points())
    }

    pub fn bounds(&self) -> Aabb2 {
        self.points().iter().fold(Aabb2::empty(), |mut b, p| {
            b.expand_point(*p);
            b
        })
    }

    /// Edges as point pairs, closing back to the head
    pub fn edges(&self) -> Vec<(Vec2, Vec2)> {
        let points = self.points();
        let n = points.len();
        (0..n).map(|i| (points[i], points[(i + 1) % n])).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolarConfig;
    use crate::geometry::Line;
    use crate::polar::PolarShadowMaps;
    use glam::Vec3;

    fn square() -> VisibilityPolygon {
        // A square with a midpoint on every edge and a doubled corner
        let pts = [
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(-1.0, 1.0),
            Vec2::new(-1.0, 0.0),
            Vec2::new(-1.0, -1.0),
            Vec2::new(0.0, -1.0),
        ];
        VisibilityPolygon::from_points(Vec2::ZERO, pts)
    }

    #[test]
    fn test_simplify_square() {
        let mut poly = square();
        assert_eq!(poly.len(), 9);
        assert_eq!(poly.simplify(), 5);
        assert_eq!(poly.len(), 4);
        assert!((poly.signed_area2() + 8.0).abs() < 1e-5);
        assert_eq!(poly.triangles().len(), 4);
    }

    #[test]
    fn test_counter_clockwise_input_is_stored_clockwise() {
        let ccw = [Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(-1.0, 0.0), Vec2::new(0.0, -1.0)];
        let poly = VisibilityPolygon::from_points(Vec2::ZERO, ccw);
        assert!(poly.signed_area2() < 0.0);
        assert_eq!(poly.len(), 4);

        let mut cw = ccw;
        cw.reverse();
        let poly = VisibilityPolygon::from_points(Vec2::ZERO, cw);
        assert!(poly.signed_area2() < 0.0);
        assert_eq!(poly.points()[0], cw[0]);
    }

    #[test]
    fn test_contains() {
        let mut poly = square();
        poly.simplify();
        assert!(poly.contains(Vec2::new(0.5, 0.5)));
        assert!(!poly.contains(Vec2::new(1.5, 0.0)));
        let b = poly.bounds();
        assert_eq!(b.min, Vec2::splat(-1.0));
        assert_eq!(b.max, Vec2::splat(1.0));
    }

    #[test]
    fn test_polygon_from_open_light_is_its_radius() {
        let mut maps = PolarShadowMaps::new(&PolarConfig {
            resolution: 64,
            max_lights: 1,
            peel: false,
        });
        let light = PointLight::new(Vec2::new(0.5, 0.5), 0.25, Vec3::ONE);
        maps.rebuild_all(&[], &[light]);
        let poly = VisibilityPolygon::from_polar_row(maps.base(), 0, &light);
        assert_eq!(poly.len(), 64);
        for p in poly.points() {
            assert!(((p - light.position).length() - 0.25).abs() < 1e-5);
        }
        assert!(poly.signed_area2() < 0.0);
    }

    #[test]
    fn test_wall_cuts_polygon() {
        let mut maps = PolarShadowMaps::new(&PolarConfig {
            resolution: 256,
            max_lights: 1,
            peel: false,
        });
        let light = PointLight::new(Vec2::new(0.5, 0.5), 1.0, Vec3::ONE);
        let wall = Line::new(Vec2::new(0.0, 0.6), Vec2::new(1.0, 0.6));
        maps.rebuild_all(&[wall], &[light]);
        let poly = VisibilityPolygon::from_polar_row(maps.base(), 0, &light);
        assert!(poly.len() < 256);
        assert!(poly.contains(Vec2::new(0.5, 0.55)));
        assert!(!poly.contains(Vec2::new(0.5, 0.7)));
        assert!(poly.contains(Vec2::new(0.5, 0.1)));
    }
}
