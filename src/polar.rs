//! Polar shadow maps
//!
//! One atlas row per light, one column per angular cell. Column `c` covers
//! the angle `(c + 0.5) / W` turns (taken modulo one turn). Every line is
//! projected into light-local polar space and drawn twice, at its natural
//! angle and one turn later, so segments crossing the ±½ seam land on both
//! sides of the wrapping texture.
//!
//! Each cell keeps the nearest line (light-local endpoints, lower angle
//! first) and its depth `encode_distance(|I|)`, where `I` is where the
//! cell's ray meets the line. The optional peel layer holds the next line
//! behind it.

use glam::{Vec2, Vec4};
use rayon::prelude::*;

use crate::config::PolarConfig;
use crate::format::{decode_distance, encode_distance};
use crate::geometry::{polar_angle, ray_line_distance, turn_direction, Aabb2, Line};
use crate::light::PointLight;
use crate::texture::{Texture2d, WrapMode};

/// Depth of a cell no line covers
pub const CLEARED_DEPTH: f32 = 1.0;

/// Line texel of a cell no line covers; a degenerate line never occludes
pub const CLEARED_LINE: Vec4 = Vec4::ZERO;

/// A line map and its depth attachment
#[derive(Debug, Clone)]
pub struct PolarLayer {
    pub lines: Texture2d<Vec4>,
    pub depth: Texture2d<f32>,
}

impl PolarLayer {
    fn new(width: u32, rows: u32) -> Self {
        Self {
            lines: Texture2d::filled(width, rows, CLEARED_LINE)
                .with_wrap(WrapMode::Repeat, WrapMode::ClampToEdge),
            depth: Texture2d::filled(width, rows, CLEARED_DEPTH)
                .with_wrap(WrapMode::Repeat, WrapMode::ClampToEdge),
        }
    }

    fn clear(&mut self) {
        self.lines.fill(CLEARED_LINE);
        self.depth.fill(CLEARED_DEPTH);
    }

    fn clear_row(&mut self, row: u32) {
        self.lines.fill_row(row, CLEARED_LINE);
        self.depth.fill_row(row, CLEARED_DEPTH);
    }

    /// Nearest-sampled line texel at angle `theta` (turns)
    pub fn line_at(&self, row: u32, theta: f32) -> Vec4 {
        self.lines.fetch(column_of(theta, self.lines.width()), row as i32)
    }

    /// Decoded distance of cell `column` (wrapped); infinite when cleared
    pub fn distance_at(&self, row: u32, column: i32) -> f32 {
        decode_distance(self.depth.fetch(column, row as i32))
    }
}

/// Column holding angle `theta` under nearest sampling (unwrapped)
#[inline]
pub fn column_of(theta: f32, width: u32) -> i32 {
    (theta * width as f32).floor() as i32
}

/// Centre angle of `column` in turns
#[inline]
pub fn column_angle(column: i32, width: u32) -> f32 {
    (column as f32 + 0.5) / width as f32
}

/// A line as one draw instance sees it: light-local, sorted by angle
#[derive(Debug, Clone, Copy)]
struct ProjectedLine {
    local: Vec4,
    theta_lo: f32,
    theta_hi: f32,
}

fn project(line: &Line, light: Vec2) -> ProjectedLine {
    let mut a = line.a - light;
    let mut b = line.b - light;
    let mut ta = polar_angle(a);
    let mut tb = polar_angle(b);

    // Draw the short arc: pull the larger angle back by one turn
    if (ta - tb).abs() > 0.5 {
        if ta > tb {
            ta -= 1.0;
        } else {
            tb -= 1.0;
        }
    }
    if tb < ta {
        std::mem::swap(&mut ta, &mut tb);
        std::mem::swap(&mut a, &mut b);
    }

    ProjectedLine {
        local: Vec4::new(a.x, a.y, b.x, b.y),
        theta_lo: ta,
        theta_hi: tb,
    }
}

/// Rasterise every line into one row.
///
/// `discard` is the peel predicate: fragments whose line equals the texel
/// it returns for their column are dropped.
fn draw_row<F>(lines_row: &mut [Vec4], depth_row: &mut [f32], lines: &[Line], light: Vec2, discard: F)
where
    F: Fn(usize) -> Vec4,
{
    let width = lines_row.len() as u32;
    let w = width as f32;

    for line in lines {
        let projected = project(line, light);
        for offset in [0.0, 1.0] {
            let lo = projected.theta_lo + offset;
            let hi = projected.theta_hi + offset;
            // Columns whose centre lies in [lo, hi]
            let first = ((lo * w - 0.5).ceil() as i32).max(0);
            let last = ((hi * w - 0.5).floor() as i32).min(width as i32 - 1);
            for column in first..=last {
                let c = column as usize;
                if discard(c) == projected.local {
                    continue;
                }
                let dir = turn_direction(column_angle(column, width));
                let Some(distance) = ray_line_distance(dir, projected.local) else {
                    continue;
                };
                let depth = encode_distance(distance);
                if depth < depth_row[c] {
                    depth_row[c] = depth;
                    lines_row[c] = projected.local;
                }
            }
        }
    }
}

// ============================================================================
// PolarShadowMaps
// ============================================================================

#[derive(Debug, Clone)]
pub struct PolarShadowMaps {
    base: PolarLayer,
    peel: Option<PolarLayer>,
    /// Times each row has been rasterised
    row_generations: Vec<u64>,
}

impl PolarShadowMaps {
    pub fn new(config: &PolarConfig) -> Self {
        let (w, l) = (config.resolution, config.max_lights);
        Self {
            base: PolarLayer::new(w, l),
            peel: config.peel.then(|| PolarLayer::new(w, l)),
            row_generations: vec![0; l as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.base.lines.width()
    }

    pub fn rows(&self) -> u32 {
        self.base.lines.height()
    }

    pub fn base(&self) -> &PolarLayer {
        &self.base
    }

    pub fn peel(&self) -> Option<&PolarLayer> {
        self.peel.as_ref()
    }

    pub fn row_generation(&self, row: usize) -> u64 {
        self.row_generations.get(row).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.base.clear();
        if let Some(peel) = &mut self.peel {
            peel.clear();
        }
    }

    /// Clear the atlas and redraw one row per light
    pub fn rebuild_all(&mut self, lines: &[Line], lights: &[PointLight]) {
        self.clear();
        let count = lights.len().min(self.rows() as usize);

        self.base
            .lines
            .par_rows_mut()
            .zip(self.base.depth.par_rows_mut())
            .take(count)
            .for_each(|((row, line_row), (_, depth_row))| {
                let light = lights[row as usize].position;
                draw_row(line_row, depth_row, lines, light, |_| CLEARED_LINE);
            });

        if let Some(peel) = &mut self.peel {
            let base = &self.base.lines;
            peel.lines
                .par_rows_mut()
                .zip(peel.depth.par_rows_mut())
                .take(count)
                .for_each(|((row, line_row), (_, depth_row))| {
                    let light = lights[row as usize].position;
                    let nearest = base.row(row);
                    draw_row(line_row, depth_row, lines, light, |c| nearest[c]);
                });
        }

        for generation in &mut self.row_generations[..count] {
            *generation += 1;
        }
        log::debug!("polar maps: {} rows x {} lines", count, lines.len());
    }

    /// Scissored clear and redraw of a single light's row
    pub fn rebuild_row(&mut self, row: usize, lines: &[Line], light: &PointLight) {
        if row >= self.rows() as usize {
            return;
        }
        let y = row as u32;
        self.base.clear_row(y);
        draw_row(
            self.base.lines.row_mut(y),
            self.base.depth.row_mut(y),
            lines,
            light.position,
            |_| CLEARED_LINE,
        );
        if let Some(peel) = &mut self.peel {
            peel.clear_row(y);
            let nearest = self.base.lines.row(y);
            draw_row(peel.lines.row_mut(y), peel.depth.row_mut(y), lines, light.position, |c| nearest[c]);
        }
        self.row_generations[row] += 1;
    }

    /// Lit bounds of a light from its depth row, never beyond its radius.
    ///
    /// Each column contributes a point at the largest distance among itself
    /// and its two neighbours, pushed out to cover the arc between samples.
    pub fn light_bounds(&self, row: usize, light: &PointLight) -> Aabb2 {
        let width = self.width();
        let y = row as u32;
        let arc = 1.0 / (std::f32::consts::PI / width as f32).cos();
        let mut bounds = Aabb2::new(light.position, light.position);
        for c in 0..width as i32 {
            let reach = (-1..=1)
                .map(|k| self.base.distance_at(y, c + k))
                .fold(0.0_f32, f32::max)
                .min(light.radius);
            let p = light.position + turn_direction(column_angle(c, width)) * reach * arc;
            bounds.expand_point(p);
        }
        bounds
    }
}
