//! Direct-light accumulator
//!
//! For every pixel and light: reject pixels outside the light's radius, look
//! up the pixel's angular cell in the polar maps, and test the segment from
//! the pixel to the light against the stored nearest lines of three
//! adjacent cells plus two segments rebuilt from the cell depths. The
//! penumbra path softens the inside of the shadow near line endpoints and
//! re-tests against the peel layer.

use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;

use crate::config::{DirectConfig, DrawMode};
use crate::geometry::{crosses_light_segment, polar_angle, turn_direction, Aabb2, Domain, EPSILON};
use crate::light::PointLight;
use crate::polar::{column_angle, PolarLayer, PolarShadowMaps};
use crate::texture::Texture2d;

/// The falloff curve, parameterised by the light radius.
///
/// `base` is the unshadowed `1 / (1 + d)` term, possibly already scaled by a
/// penumbra factor. Zero at and beyond the radius.
pub fn attenuation_curve(base: f32, dist: f32, radius: f32) -> f32 {
    if dist >= radius {
        return 0.0;
    }
    let att = (base.powf(8.0 / radius) * (radius - dist) / radius).powf(1.0 / 1.2);
    let att = att * (1.0 - (1.0 - att) * 0.055);
    att.clamp(0.0, 1.0)
}

/// Unshadowed attenuation of a light at distance `dist`
#[inline]
pub fn attenuation(dist: f32, radius: f32) -> f32 {
    attenuation_curve(1.0 / (1.0 + dist), dist, radius)
}

/// Occlusion of the light-local point `local` against one polar layer row
pub fn layer_occludes(layer: &PolarLayer, row: u32, local: Vec2) -> bool {
    let width = layer.lines.width();
    let step = 1.0 / width as f32;
    let theta = polar_angle(local);

    // Line map: the pixel's cell and its two neighbours
    let line_hit = [-step, 0.0, step]
        .iter()
        .any(|&offset| crosses_light_segment(local, layer.line_at(row, theta + offset)));
    if line_hit {
        return true;
    }

    // Depth map: segments through the centres of the cells either side of
    // the pixel's angle, closing gaps no stored line spans
    let k = (theta * width as f32).round() as i32;
    let point = |column: i32| {
        let d = layer.distance_at(row, column);
        d.is_finite()
            .then(|| turn_direction(column_angle(column, width)) * d)
    };
    let points = [point(k - 1), point(k), point(k + 1)];
    points.windows(2).any(|pair| match (pair[0], pair[1]) {
        (Some(a), Some(b)) => crosses_light_segment(local, Vec4::new(a.x, a.y, b.x, b.y)),
        _ => false,
    })
}

/// How lit a shadowed pixel is near one endpoint's cone, 0..1
fn cone_factor(to_pixel: Vec2, outer: Vec2, inner: Vec2) -> f32 {
    let denom = 1.0 - inner.dot(outer);
    if denom <= EPSILON {
        return 0.0;
    }
    (1.0 - (1.0 - to_pixel.normalize_or_zero().dot(outer)) / denom).max(0.0)
}

/// Penumbra factor of the stored lines around the pixel's angle
fn penumbra_factor(layer: &PolarLayer, row: u32, local: Vec2, radius: f32) -> f32 {
    let step = 1.0 / layer.lines.width() as f32;
    let theta = polar_angle(local);
    let mut la = 0.0_f32;
    let mut lb = 0.0_f32;

    for offset in [-step, 0.0, step] {
        let line = layer.line_at(row, theta + offset);
        let a = Vec2::new(line.x, line.y);
        let b = Vec2::new(line.z, line.w);
        if a == b {
            continue;
        }
        let ld = (a - b).normalize_or_zero();
        let la_inner = (a - ld * radius).normalize_or_zero();
        let la_outer = a.normalize_or_zero();
        let lb_inner = (b + ld * radius).normalize_or_zero();
        let lb_outer = b.normalize_or_zero();

        la = la.max(cone_factor(local - a, la_outer, la_inner));
        lb = lb.max(cone_factor(local - b, lb_outer, lb_inner));
    }
    la.max(lb)
}

/// One frame of direct lighting over a fixed light set
pub struct DirectLighting<'a> {
    maps: &'a PolarShadowMaps,
    lights: &'a [PointLight],
    config: &'a DirectConfig,
    /// Per-light lit bounds, present in bounded draw mode
    bounds: Option<Vec<Aabb2>>,
}

impl<'a> DirectLighting<'a> {
    pub fn new(maps: &'a PolarShadowMaps, lights: &'a [PointLight], config: &'a DirectConfig) -> Self {
        let count = lights.len().min(maps.rows() as usize);
        let lights = &lights[..count];
        let bounds = (config.draw_mode == DrawMode::Bounded).then(|| {
            lights
                .par_iter()
                .enumerate()
                .map(|(i, light)| maps.light_bounds(i, light))
                .collect::<Vec<_>>()
        });
        Self {
            maps,
            lights,
            config,
            bounds,
        }
    }

    pub fn bounds(&self) -> Option<&[Aabb2]> {
        self.bounds.as_deref()
    }

    /// Hard-shadow occlusion of light `index` at domain point `p`
    pub fn occluded(&self, index: usize, p: Vec2) -> bool {
        let local = p - self.lights[index].position;
        layer_occludes(self.maps.base(), index as u32, local)
    }

    /// Contribution of light `index` at domain point `p`
    pub fn light_contribution(&self, index: usize, p: Vec2) -> Vec3 {
        let light = &self.lights[index];
        let local = p - light.position;
        let dist = local.length();
        if dist >= light.radius {
            return Vec3::ZERO;
        }
        if let Some(bounds) = &self.bounds {
            if !bounds[index].contains(p) {
                return Vec3::ZERO;
            }
        }

        let row = index as u32;
        let mut base = 1.0 / (1.0 + dist);
        let mut occluded = layer_occludes(self.maps.base(), row, local);

        if occluded && self.config.penumbra {
            if let Some(peel) = self.maps.peel() {
                base *= penumbra_factor(self.maps.base(), row, local, self.config.penumbra_radius);
                if !(0.0..=1.0).contains(&base) {
                    base = 0.0;
                }
                if base > 0.0 {
                    occluded = layer_occludes(peel, row, local);
                }
            }
        }

        if occluded {
            return Vec3::ZERO;
        }
        light.color * attenuation_curve(base, dist, light.radius)
    }

    /// Sum over every light at `p`
    pub fn shade(&self, p: Vec2) -> Vec3 {
        (0..self.lights.len())
            .map(|i| self.light_contribution(i, p))
            .sum()
    }

    /// Write the direct term of every pixel of `target`
    pub fn render(&self, target: &mut Texture2d<Vec3>, domain: &Domain) {
        let (w, h) = (target.width(), target.height());
        target.par_rows_mut().for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                *texel = self.shade(domain.texel_center(x as u32, y, w, h));
            }
        });
        log::debug!("direct: {} lights over {}x{}", self.lights.len(), w, h);
    }
}
