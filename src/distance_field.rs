//! Unsigned distance field over the scene domain
//!
//! Texels hold `encode_distance(d)` as unorm16, `d` being the domain-space
//! distance from the texel centre to the nearest line. Level 0 is always
//! traced against the BVH; coarser levels are either traced again or 2x2
//! max reductions of the level above.

use glam::Vec2;
use rayon::prelude::*;

use crate::bvh::LineBvh;
use crate::config::{DistanceFieldConfig, MipStrategy};
use crate::format::{decode_distance, decode_unorm16, encode_distance, encode_unorm16};
use crate::geometry::Domain;
use crate::texture::{MipChain, Texture2d, WrapMode};

/// Sphere tracing gives up after this many steps and reports a hit
const MAX_TRACE_STEPS: usize = 256;

#[derive(Debug, Clone)]
pub struct DistanceField {
    levels: MipChain<u16>,
    domain: Domain,
    /// Self-intersection epsilon and start offset, in domain units
    bias: f32,
}

/// Trace one level texel by texel against the BVH
fn trace_level(bvh: &LineBvh, domain: &Domain, size: u32) -> Texture2d<u16> {
    Texture2d::from_fn(size, size, u16::MAX, |x, y| {
        let p = domain.texel_center(x, y, size, size);
        let d = bvh.nearest(p).map_or(f32::INFINITY, |hit| hit.distance);
        encode_unorm16(encode_distance(d))
    })
    .with_wrap(WrapMode::ClampToEdge, WrapMode::ClampToEdge)
}

impl DistanceField {
    /// Generate every level. `bias` is in normalised texture units.
    pub fn generate(bvh: &LineBvh, domain: Domain, config: &DistanceFieldConfig, bias: f32) -> Self {
        let level_count = config.mip_count as usize + 1;
        let levels = match config.mip_strategy {
            MipStrategy::Retraced => {
                let levels: Vec<_> = (0..level_count)
                    .into_par_iter()
                    .map(|level| trace_level(bvh, &domain, config.resolution >> level))
                    .collect();
                MipChain::new(levels)
            }
            MipStrategy::Downres => {
                let base = trace_level(bvh, &domain, config.resolution);
                MipChain::reduce_from(base, level_count, |t| t[0].max(t[1]).max(t[2]).max(t[3]))
            }
        };
        log::debug!(
            "distance field: {}x{}, {} levels ({:?})",
            config.resolution,
            config.resolution,
            levels.level_count(),
            config.mip_strategy
        );

        let size = domain.size();
        Self {
            levels,
            domain,
            bias: bias * size.x.max(size.y),
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.level_count()
    }

    pub fn level(&self, level: usize) -> &Texture2d<u16> {
        self.levels.level(level)
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// Stored distance of texel `(x, y)` on `level`
    pub fn texel_distance(&self, level: usize, x: u32, y: u32) -> f32 {
        decode_distance(decode_unorm16(self.levels.level(level).get(x, y)))
    }

    /// Filtered distance at a domain point.
    ///
    /// The encoded value is interpolated before decoding; the decode is
    /// convex, so the result never exceeds the interpolated distances.
    pub fn distance(&self, p: Vec2, level: usize) -> f32 {
        let tex = self.levels.level(level);
        let v: f32 = tex.sample_bilinear_with(self.domain.to_uv(p), decode_unorm16);
        decode_distance(v)
    }

    /// Largest amount a bilinear sample of `level` can overestimate the true
    /// distance by: half a texel diagonal
    fn reconstruction_margin(&self, level: usize) -> f32 {
        let tex = self.levels.level(level);
        let size = self.domain.size();
        let texel = (size.x / tex.width() as f32).max(size.y / tex.height() as f32);
        texel * std::f32::consts::FRAC_1_SQRT_2
    }

    /// Sphere trace from `from` toward `to` on the finest level.
    ///
    /// The walk starts `bias` away from `from`. Returns the distance
    /// travelled when the conservative field value drops below `bias`, or
    /// `None` when `to` is reached.
    pub fn trace(&self, from: Vec2, to: Vec2) -> Option<f32> {
        let offset = to - from;
        let total = offset.length();
        if total <= self.bias {
            return None;
        }
        let dir = offset / total;
        let margin = self.reconstruction_margin(0);

        let mut travelled = self.bias;
        for _ in 0..MAX_TRACE_STEPS {
            if travelled >= total {
                return None;
            }
            let d = self.distance(from + dir * travelled, 0) - margin;
            if d < self.bias {
                return Some(travelled);
            }
            travelled += d;
        }
        Some(travelled.min(total))
    }
}
