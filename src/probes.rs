//! Probe grid: neighbour visibility, neighbour distances and radiance tiles
//!
//! Probes sit at the cell centres of a `P x P` grid over the domain. Each
//! probe owns an `S x S` tile of the radiance atlas, one texel per sampled
//! direction. Neighbour bits and cardinal distances come from sphere tracing
//! the distance field; radiance comes from BVH rays shaded against the
//! lights.

use glam::{IVec2, Vec2, Vec3};
use rayon::prelude::*;

use crate::bvh::LineBvh;
use crate::config::ProbeConfig;
use crate::direct::attenuation;
use crate::distance_field::DistanceField;
use crate::format::{encode_unorm16, quantize_r11g11b10};
use crate::geometry::{turn_direction, Domain, Line};
use crate::light::PointLight;
use crate::texture::Texture2d;
use crate::util::Rng;

/// Neighbour offsets; bit `k` of the visibility byte is `NEIGHBOURS[k]`
pub const NEIGHBOURS: [IVec2; 8] = [
    IVec2::new(1, 0),
    IVec2::new(1, 1),
    IVec2::new(0, 1),
    IVec2::new(-1, 1),
    IVec2::new(-1, 0),
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
];

/// Cardinal directions in distance-texel order: +x, +y, -x, -y
pub const CARDINALS: [IVec2; 4] = [
    IVec2::new(1, 0),
    IVec2::new(0, 1),
    IVec2::new(-1, 0),
    IVec2::new(0, -1),
];

/// Visibility bit of cardinal `k`
#[inline]
pub const fn cardinal_bit(k: usize) -> u8 {
    1 << (2 * k)
}

/// Stored distance of an unobstructed cardinal
pub const UNOBSTRUCTED: u16 = u16::MAX;

/// Offset off a hit line before testing light visibility
const SURFACE_OFFSET: f32 = 1e-4;

/// Placement of probes and tiles over the domain
#[derive(Debug, Clone, Copy)]
pub struct GridLayout {
    pub domain: Domain,
    pub resolution: u32,
    pub sample_size: u32,
}

impl GridLayout {
    #[inline]
    pub fn in_grid(&self, cell: IVec2) -> bool {
        let p = self.resolution as i32;
        cell.x >= 0 && cell.y >= 0 && cell.x < p && cell.y < p
    }

    #[inline]
    pub fn probe_center(&self, cell: IVec2) -> Vec2 {
        let p = self.resolution as f32;
        self.domain
            .from_uv((cell.as_vec2() + Vec2::splat(0.5)) / p)
    }

    /// Domain distance between neighbouring probe centres, per axis
    pub fn spacing(&self) -> Vec2 {
        self.domain.size() / self.resolution as f32
    }

    /// Direction of tile texel `(tx, ty)`
    #[inline]
    pub fn sample_direction(&self, tx: u32, ty: u32, jitter: f32) -> Vec2 {
        let s = self.sample_size;
        let k = (ty * s + tx) as f32;
        turn_direction((k + 0.5 + jitter) / (s * s) as f32)
    }

    pub fn atlas_size(&self) -> u32 {
        self.resolution * self.sample_size
    }
}

/// What radiance rays see
pub struct RadianceScene<'a> {
    pub bvh: &'a LineBvh,
    pub lines: &'a [Line],
    pub lights: &'a [PointLight],
    pub ambient: Vec3,
    pub albedo: Vec3,
}

impl RadianceScene<'_> {
    /// Radiance arriving at `origin` from direction `dir`
    pub fn trace(&self, origin: Vec2, dir: Vec2, max_distance: f32) -> Vec3 {
        let Some(hit) = self.bvh.raycast(origin, dir, max_distance) else {
            return self.ambient;
        };
        let Some(line) = self.lines.get(hit.id as usize) else {
            return self.ambient;
        };

        let q = origin + hit.d_uv;
        let normal = line.normal_facing(origin);
        let lifted = q + normal * SURFACE_OFFSET;

        let mut irradiance = self.ambient;
        for light in self.lights {
            let to_light = light.position - q;
            let dist = to_light.length();
            if dist >= light.radius {
                continue;
            }
            let lambert = normal.dot(to_light.normalize_or_zero());
            if lambert <= 0.0 || self.bvh.occluded(lifted, light.position) {
                continue;
            }
            irradiance += light.color * attenuation(dist, light.radius) * lambert;
        }
        self.albedo * irradiance
    }
}

// ============================================================================
// Kernels
// ============================================================================

fn visibility_kernel(layout: &GridLayout, df: &DistanceField) -> (Texture2d<u8>, Texture2d<[u16; 4]>) {
    let p = layout.resolution;
    let mut visibility = Texture2d::filled(p, p, 0_u8);
    let mut distances = Texture2d::filled(p, p, [UNOBSTRUCTED; 4]);

    visibility
        .par_rows_mut()
        .zip(distances.par_rows_mut())
        .for_each(|((y, vis_row), (_, dist_row))| {
            for x in 0..p {
                let cell = IVec2::new(x as i32, y as i32);
                let from = layout.probe_center(cell);

                let mut mask = 0_u8;
                for (k, offset) in NEIGHBOURS.iter().enumerate() {
                    let neighbour = cell + *offset;
                    if layout.in_grid(neighbour) && df.trace(from, layout.probe_center(neighbour)).is_none() {
                        mask |= 1 << k;
                    }
                }
                vis_row[x as usize] = mask;

                let mut dists = [UNOBSTRUCTED; 4];
                for (k, offset) in CARDINALS.iter().enumerate() {
                    let to = layout.probe_center(cell + *offset);
                    let total = (to - from).length();
                    if let Some(hit) = df.trace(from, to) {
                        dists[k] = encode_unorm16(hit / total);
                    }
                }
                dist_row[x as usize] = dists;
            }
        });

    (visibility, distances)
}

fn radiance_kernel(layout: &GridLayout, scene: &RadianceScene<'_>, jitter: f32) -> Texture2d<Vec3> {
    let size = layout.atlas_size();
    let s = layout.sample_size;
    let max_distance = layout.domain.size().length();

    Texture2d::from_fn(size, size, Vec3::ZERO, |ax, ay| {
        let cell = IVec2::new((ax / s) as i32, (ay / s) as i32);
        let origin = layout.probe_center(cell);
        let dir = layout.sample_direction(ax % s, ay % s, jitter);
        scene.trace(origin, dir, max_distance)
    })
}

/// One spatial filter iteration over the atlas.
///
/// Each tile texel blends with the matching texel of its cardinal
/// neighbours. `blocking` weights a neighbour by its visibility bit;
/// otherwise every in-grid neighbour gets `weight`.
fn filter_pass(
    layout: &GridLayout,
    visibility: &Texture2d<u8>,
    src: &Texture2d<Vec3>,
    dst: &mut Texture2d<Vec3>,
    blocking: bool,
    weight: f32,
) {
    let s = layout.sample_size as i32;
    dst.par_rows_mut().for_each(|(ay, row)| {
        for (ax, texel) in row.iter_mut().enumerate() {
            let (ax, ay) = (ax as i32, ay as i32);
            let cell = IVec2::new(ax / s, ay / s);
            let mask = visibility.get(cell.x as u32, cell.y as u32);

            let mut sum = src.get(ax as u32, ay as u32);
            let mut total = 1.0;
            for (k, offset) in CARDINALS.iter().enumerate() {
                let neighbour = cell + *offset;
                if !layout.in_grid(neighbour) {
                    continue;
                }
                let w = if blocking {
                    if mask & cardinal_bit(k) == 0 {
                        continue;
                    }
                    1.0
                } else {
                    weight
                };
                let t = IVec2::new(ax, ay) + *offset * s;
                sum += src.get(t.x as u32, t.y as u32) * w;
                total += w;
            }
            *texel = quantize_r11g11b10(sum / total);
        }
    });
}

// ============================================================================
// ProbeGrid
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProbeGrid {
    layout: GridLayout,
    config: ProbeConfig,
    visibility: Texture2d<u8>,
    distances: Texture2d<[u16; 4]>,
    /// Filtered, stored radiance (R11G11B10 values)
    radiance: Texture2d<Vec3>,
    /// Running sum of unfiltered samples
    accumulation: Texture2d<Vec3>,
    frames: u32,
    rng: Rng,
}

impl ProbeGrid {
    pub fn new(config: &ProbeConfig, domain: Domain) -> Self {
        let layout = GridLayout {
            domain,
            resolution: config.resolution,
            sample_size: config.sample_size,
        };
        let p = config.resolution;
        let size = layout.atlas_size();
        Self {
            layout,
            config: config.clone(),
            visibility: Texture2d::filled(p, p, 0),
            distances: Texture2d::filled(p, p, [UNOBSTRUCTED; 4]),
            radiance: Texture2d::filled(size, size, Vec3::ZERO),
            accumulation: Texture2d::filled(size, size, Vec3::ZERO),
            frames: 0,
            rng: Rng::new(0x9e37_79b9),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn visibility(&self) -> &Texture2d<u8> {
        &self.visibility
    }

    pub fn distances(&self) -> &Texture2d<[u16; 4]> {
        &self.distances
    }

    pub fn radiance(&self) -> &Texture2d<Vec3> {
        &self.radiance
    }

    /// Frames accumulated since the last reset
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Whether temporal accumulation has reached its frame budget
    pub fn is_converged(&self) -> bool {
        self.config.accumulation_frames > 0 && self.frames >= self.config.accumulation_frames
    }

    pub fn reset_accumulation(&mut self) {
        self.frames = 0;
        self.accumulation.fill(Vec3::ZERO);
    }

    /// Neighbour bits and cardinal distances from the distance field
    pub fn compute_visibility(&mut self, df: &DistanceField) {
        let (visibility, distances) = visibility_kernel(&self.layout, df);
        self.visibility = visibility;
        self.distances = distances;
    }

    /// Visibility and radiance for one frame.
    ///
    /// The two kernels are independent and run side by side. Returns `false`
    /// when accumulation had already converged and nothing was resampled.
    pub fn update(&mut self, df: &DistanceField, scene: &RadianceScene<'_>) -> bool {
        if self.is_converged() {
            return false;
        }

        let jitter = if self.config.accumulation_frames > 0 && self.frames > 0 {
            self.rng.next_f32() - 0.5
        } else {
            0.0
        };

        let layout = self.layout;
        let ((visibility, distances), samples) = rayon::join(
            || visibility_kernel(&layout, df),
            || radiance_kernel(&layout, scene, jitter),
        );
        self.visibility = visibility;
        self.distances = distances;

        if self.config.accumulation_frames > 0 {
            self.frames += 1;
            self.accumulation.par_rows_mut().for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel += samples.get(x as u32, y);
                }
            });
            let inv = 1.0 / self.frames as f32;
            let sum = &self.accumulation;
            self.radiance = Texture2d::from_fn(sum.width(), sum.height(), Vec3::ZERO, |x, y| {
                quantize_r11g11b10(sum.get(x, y) * inv)
            });
        } else {
            self.radiance = Texture2d::from_fn(samples.width(), samples.height(), Vec3::ZERO, |x, y| {
                quantize_r11g11b10(samples.get(x, y))
            });
        }

        if self.config.filter {
            self.filter();
        }
        log::debug!(
            "probes: {}x{} grid, {} samples each, frame {}",
            self.layout.resolution,
            self.layout.resolution,
            self.layout.sample_size * self.layout.sample_size,
            self.frames
        );
        true
    }

    /// Blocking pass then seam pass, ping-ponging between two atlases
    fn filter(&mut self) {
        let mut scratch = self.radiance.clone();
        filter_pass(&self.layout, &self.visibility, &self.radiance, &mut scratch, true, 1.0);
        filter_pass(
            &self.layout,
            &self.visibility,
            &scratch,
            &mut self.radiance,
            false,
            self.config.seam_blend,
        );
    }
}
