//! Circular-harmonic integration and indirect reconstruction
//!
//! Each probe tile is reduced to moments up to second order:
//!
//! ```text
//! a0 = mean(L)                       (RGB, R11G11B10)
//! a1, b1 = 2/N Σ l cos θ, 2/N Σ l sin θ    (luminance, RGBA16F with a0 of l)
//! a2, b2 = 2/N Σ l cos 2θ, 2/N Σ l sin 2θ  (luminance, RG16F)
//! ```
//!
//! Directional structure is carried by luminance only and re-applied to the
//! RGB mean as a relative modulation.

use std::f32::consts::FRAC_PI_4;
use std::ops::{Add, Mul};

use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;

use crate::format::{
    decode_unorm16, luminance, quantize_r11g11b10, quantize_rg16f, quantize_rgba16f,
};
use crate::geometry::{Domain, EPSILON, TAU};
use crate::probes::{GridLayout, ProbeGrid};
use crate::texture::{Texture2d, WrapMode};

/// Clamped-cosine convolution weights per band
pub const IRRADIANCE_WEIGHTS: [f32; 3] = [1.0, FRAC_PI_4, 1.0 / 3.0];

/// Decoded moments of one probe
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeHarmonics {
    pub dc: Vec3,
    pub a0_lum: f32,
    pub a1: f32,
    pub b1: f32,
    pub a2: f32,
    pub b2: f32,
}

impl ProbeHarmonics {
    /// Project a tile of samples at angles `2π (k + 0.5) / N`
    pub fn project(samples: &[Vec3]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self::default();
        }
        // f64 sums keep the mean of a uniform tile exact
        let mut dc = [0.0_f64; 3];
        let mut lum = 0.0_f64;
        let mut m = [0.0_f64; 4];
        for (k, c) in samples.iter().enumerate() {
            let theta = f64::from(TAU) * (k as f64 + 0.5) / n as f64;
            let l = f64::from(luminance(*c));
            dc[0] += f64::from(c.x);
            dc[1] += f64::from(c.y);
            dc[2] += f64::from(c.z);
            lum += l;
            m[0] += l * theta.cos();
            m[1] += l * theta.sin();
            m[2] += l * (2.0 * theta).cos();
            m[3] += l * (2.0 * theta).sin();
        }
        let inv = 1.0 / n as f64;
        let two = 2.0 * inv;
        Self {
            dc: Vec3::new((dc[0] * inv) as f32, (dc[1] * inv) as f32, (dc[2] * inv) as f32),
            a0_lum: (lum * inv) as f32,
            a1: (m[0] * two) as f32,
            b1: (m[1] * two) as f32,
            a2: (m[2] * two) as f32,
            b2: (m[3] * two) as f32,
        }
    }

    /// Round every moment through its storage format
    pub fn quantized(&self) -> Self {
        let first = quantize_rgba16f(Vec4::new(self.a1, self.b1, self.a0_lum, 0.0));
        let second = quantize_rg16f(Vec2::new(self.a2, self.b2));
        Self {
            dc: quantize_r11g11b10(self.dc),
            a0_lum: first.z,
            a1: first.x,
            b1: first.y,
            a2: second.x,
            b2: second.y,
        }
    }

    fn modulated(&self, phi: f32, w1: f32, w2: f32) -> Vec3 {
        if self.a0_lum <= EPSILON {
            return self.dc;
        }
        let (s1, c1) = phi.sin_cos();
        let (s2, c2) = (2.0 * phi).sin_cos();
        let first = self.a1 * c1 + self.b1 * s1;
        let second = self.a2 * c2 + self.b2 * s2;
        let scale = 1.0 + (w1 * first + w2 * second) / self.a0_lum;
        (self.dc * scale).max(Vec3::ZERO)
    }

    /// Radiance arriving from angle `phi` (radians)
    pub fn radiance(&self, phi: f32) -> Vec3 {
        self.modulated(phi, 1.0, 1.0)
    }

    /// Irradiance of a surface facing angle `phi` (radians)
    pub fn irradiance(&self, phi: f32) -> Vec3 {
        self.modulated(phi, IRRADIANCE_WEIGHTS[1], IRRADIANCE_WEIGHTS[2])
    }

    /// Irradiance with no preferred facing: the mean
    pub fn scalar_irradiance(&self) -> Vec3 {
        self.dc * IRRADIANCE_WEIGHTS[0]
    }
}

impl Add for ProbeHarmonics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            dc: self.dc + rhs.dc,
            a0_lum: self.a0_lum + rhs.a0_lum,
            a1: self.a1 + rhs.a1,
            b1: self.b1 + rhs.b1,
            a2: self.a2 + rhs.a2,
            b2: self.b2 + rhs.b2,
        }
    }
}

impl Mul<f32> for ProbeHarmonics {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self {
            dc: self.dc * rhs,
            a0_lum: self.a0_lum * rhs,
            a1: self.a1 * rhs,
            b1: self.b1 * rhs,
            a2: self.a2 * rhs,
            b2: self.b2 * rhs,
        }
    }
}

// ============================================================================
// Integrator
// ============================================================================

/// The three `P x P` harmonic textures
#[derive(Debug, Clone)]
pub struct HarmonicTextures {
    /// RGB mean, R11G11B10 values
    pub dc: Texture2d<Vec3>,
    /// `(a1, b1, a0_lum, 0)`, RGBA16F values
    pub first: Texture2d<Vec4>,
    /// `(a2, b2)`, RG16F values
    pub second: Texture2d<Vec2>,
}

impl HarmonicTextures {
    pub fn new(resolution: u32) -> Self {
        let p = resolution;
        Self {
            dc: Texture2d::filled(p, p, Vec3::ZERO).with_wrap(WrapMode::ClampToEdge, WrapMode::ClampToEdge),
            first: Texture2d::filled(p, p, Vec4::ZERO),
            second: Texture2d::filled(p, p, Vec2::ZERO),
        }
    }

    /// Reduce every probe tile of `grid` to its moments
    pub fn integrate(grid: &ProbeGrid) -> Self {
        let layout = grid.layout();
        let p = layout.resolution;
        let s = layout.sample_size;
        let radiance = grid.radiance();

        let moments: Vec<ProbeHarmonics> = (0..p * p)
            .into_par_iter()
            .map(|i| {
                let (px, py) = (i % p, i / p);
                let tile: Vec<Vec3> = (0..s * s)
                    .map(|k| radiance.get(px * s + k % s, py * s + k / s))
                    .collect();
                ProbeHarmonics::project(&tile).quantized()
            })
            .collect();

        let mut textures = Self::new(p);
        for (i, h) in moments.iter().enumerate() {
            let (x, y) = (i as u32 % p, i as u32 / p);
            textures.dc.set(x, y, h.dc);
            textures.first.set(x, y, Vec4::new(h.a1, h.b1, h.a0_lum, 0.0));
            textures.second.set(x, y, Vec2::new(h.a2, h.b2));
        }
        log::debug!("harmonics: integrated {} probes", p * p);
        textures
    }

    pub fn probe(&self, x: u32, y: u32) -> ProbeHarmonics {
        let first = self.first.get(x, y);
        let second = self.second.get(x, y);
        ProbeHarmonics {
            dc: self.dc.get(x, y),
            a0_lum: first.z,
            a1: first.x,
            b1: first.y,
            a2: second.x,
            b2: second.y,
        }
    }
}

// ============================================================================
// Indirect sampler
// ============================================================================

/// Bilateral reconstruction of probe harmonics at arbitrary points
pub struct IndirectSampler<'a> {
    textures: &'a HarmonicTextures,
    distances: &'a Texture2d<[u16; 4]>,
    layout: GridLayout,
}

impl<'a> IndirectSampler<'a> {
    pub fn new(textures: &'a HarmonicTextures, grid: &'a ProbeGrid) -> Self {
        Self {
            textures,
            distances: grid.distances(),
            layout: *grid.layout(),
        }
    }

    /// Can probe `(x, y)` see `offset` (in probe spacings, each axis 0..1)
    /// along its cardinal rays?
    fn reaches(&self, x: u32, y: u32, offset: Vec2) -> bool {
        let d = self.distances.get(x, y);
        // Cardinal order +x, +y, -x, -y
        let along_x = if offset.x >= 0.0 { d[0] } else { d[2] };
        let along_y = if offset.y >= 0.0 { d[1] } else { d[3] };
        decode_unorm16(along_x) >= offset.x.abs() && decode_unorm16(along_y) >= offset.y.abs()
    }

    /// Blended moments at domain point `p`
    pub fn sample(&self, p: Vec2) -> ProbeHarmonics {
        let n = self.layout.resolution;
        match n {
            0 => return ProbeHarmonics::default(),
            1 => return self.textures.probe(0, 0),
            _ => {},
        }
        let last = (n - 1) as f32;
        let uv = self.layout.domain.to_uv(p);
        let s = (uv * n as f32 - Vec2::splat(0.5)).clamp(Vec2::ZERO, Vec2::splat(last));
        let x0 = (s.x.floor() as u32).min(n - 2);
        let y0 = (s.y.floor() as u32).min(n - 2);
        let f = s - Vec2::new(x0 as f32, y0 as f32);

        let corners = [
            (x0, y0, (1.0 - f.x) * (1.0 - f.y), Vec2::new(f.x, f.y)),
            (x0 + 1, y0, f.x * (1.0 - f.y), Vec2::new(f.x - 1.0, f.y)),
            (x0, y0 + 1, (1.0 - f.x) * f.y, Vec2::new(f.x, f.y - 1.0)),
            (x0 + 1, y0 + 1, f.x * f.y, Vec2::new(f.x - 1.0, f.y - 1.0)),
        ];

        let mut blended = ProbeHarmonics::default();
        let mut total = 0.0;
        for &(x, y, w, offset) in &corners {
            if w > 0.0 && self.reaches(x, y, offset) {
                blended = blended + self.textures.probe(x, y) * w;
                total += w;
            }
        }
        if total > 0.0 {
            return blended * (1.0 / total);
        }

        // Every probe is walled off: plain bilinear
        corners
            .iter()
            .fold(ProbeHarmonics::default(), |acc, &(x, y, w, _)| {
                acc + self.textures.probe(x, y) * w
            })
    }

    /// Add `strength` times the scalar irradiance to every pixel of `target`
    pub fn render(&self, target: &mut Texture2d<Vec3>, domain: &Domain, strength: f32) {
        let (w, h) = (target.width(), target.height());
        target.par_rows_mut().for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                let p = domain.texel_center(x as u32, y, w, h);
                *texel += self.sample(p).scalar_irradiance() * strength;
            }
        });
        log::debug!("indirect: {}x{}", w, h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_from(f: impl Fn(f32) -> Vec3, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|k| f(TAU * (k as f32 + 0.5) / n as f32))
            .collect()
    }

    #[test]
    fn test_uniform_tile_has_no_directional_moments() {
        let c = quantize_r11g11b10(Vec3::new(0.3, 0.6, 0.9));
        let h = ProbeHarmonics::project(&vec![c; 16]).quantized();
        assert_eq!(h.dc, c);
        assert!(h.a1.abs() < 1e-4 && h.b1.abs() < 1e-4);
        assert!(h.a2.abs() < 1e-4 && h.b2.abs() < 1e-4);
    }

    #[test]
    fn test_first_order_recovers_cosine_lobe() {
        // l(θ) = 1 + 0.5 cos θ for a grey signal
        let tile = tile_from(|t| Vec3::splat(1.0 + 0.5 * t.cos()), 16);
        let h = ProbeHarmonics::project(&tile);
        assert!((h.a0_lum - 1.0).abs() < 1e-5);
        assert!((h.a1 - 0.5).abs() < 1e-5);
        assert!(h.b1.abs() < 1e-5);
        let peak = h.radiance(0.0);
        assert!((peak.x - 1.5).abs() < 1e-4);
        let trough = h.radiance(std::f32::consts::PI);
        assert!((trough.x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_second_order() {
        let tile = tile_from(|t| Vec3::splat(1.0 + 0.25 * (2.0 * t).sin()), 16);
        let h = ProbeHarmonics::project(&tile);
        assert!((h.b2 - 0.25).abs() < 1e-5);
        assert!(h.a1.abs() < 1e-5);
    }

    #[test]
    fn test_irradiance_weights() {
        let tile = tile_from(|t| Vec3::splat(1.0 + 0.5 * t.cos()), 16);
        let h = ProbeHarmonics::project(&tile);
        let e = h.irradiance(0.0);
        assert!((e.x - (1.0 + FRAC_PI_4 * 0.5)).abs() < 1e-4);
        assert_eq!(h.scalar_irradiance(), h.dc);
    }

    #[test]
    fn test_single_probe_grid_samples_that_probe() {
        use crate::config::ProbeConfig;

        let config = ProbeConfig {
            resolution: 1,
            ..ProbeConfig::default()
        };
        let grid = ProbeGrid::new(&config, Domain::UNIT);
        let mut textures = HarmonicTextures::new(1);
        textures.dc.set(0, 0, Vec3::new(0.25, 0.5, 0.75));
        textures.first.set(0, 0, Vec4::new(0.1, 0.0, 0.5, 0.0));
        let sampler = IndirectSampler::new(&textures, &grid);
        for p in [Vec2::new(0.5, 0.5), Vec2::ZERO, Vec2::new(0.99, 0.01)] {
            let h = sampler.sample(p);
            assert_eq!(h.dc, Vec3::new(0.25, 0.5, 0.75));
            assert_eq!(h.a1, 0.1);
        }
    }

    #[test]
    fn test_dark_probe_reconstructs_dc() {
        let h = ProbeHarmonics::default();
        assert_eq!(h.radiance(1.0), Vec3::ZERO);
    }
}
