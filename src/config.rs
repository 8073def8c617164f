//! Pipeline configuration
//!
//! Every section carries `#[serde(default)]`, so a JSON file only needs the
//! values it changes. [`Config::validate`] is the pass-creation step: a
//! config that cannot produce valid passes fails there and nowhere else.

use std::fs;
use std::path::Path;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{LightError, LightResult};
use crate::geometry::Domain;

/// Smallest distance-field level mips are allowed to reach
pub const MIN_DF_MIP_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MipStrategy {
    /// Every level is traced against the BVH
    Retraced,
    /// The finest level is traced; coarser levels are 2x2 max reductions
    Downres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    /// Every light is evaluated at every pixel
    Fullscreen,
    /// Each light only touches pixels inside its lit bounds
    Bounded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarConfig {
    /// Angular resolution W (columns per row)
    pub resolution: u32,
    /// Atlas rows L, one per light
    pub max_lights: u32,
    /// Also render the second-nearest line maps
    pub peel: bool,
}

impl Default for PolarConfig {
    fn default() -> Self {
        Self {
            resolution: 512,
            max_lights: 256,
            peel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceFieldConfig {
    pub resolution: u32,
    /// Number of levels below the finest one
    pub mip_count: u32,
    pub mip_strategy: MipStrategy,
}

impl Default for DistanceFieldConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            mip_count: 1,
            mip_strategy: MipStrategy::Downres,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probes per axis (P)
    pub resolution: u32,
    /// Radiance tile edge (S); S² directions per probe
    pub sample_size: u32,
    /// Run the visibility-weighted spatial filter on the radiance atlas
    pub filter: bool,
    /// Weight of the second, unblocked filter iteration
    pub seam_blend: f32,
    /// Radiance returned by rays that escape the scene
    pub ambient: Vec3,
    /// Diffuse albedo of every line
    pub albedo: Vec3,
    /// Frames of jittered accumulation; 0 resamples every frame
    pub accumulation_frames: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            resolution: 32,
            sample_size: 4,
            filter: true,
            seam_blend: 0.25,
            ambient: Vec3::splat(0.02),
            albedo: Vec3::splat(0.7),
            accumulation_frames: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    pub penumbra: bool,
    /// Emitter radius used by the penumbra cones, in domain units
    pub penumbra_radius: f32,
    pub draw_mode: DrawMode,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            penumbra: false,
            penumbra_radius: 0.01,
            draw_mode: DrawMode::Fullscreen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhConfig {
    /// Assign the odd middle element by endpoint pairs instead of half means
    pub fast_build: bool,
    pub max_nodes: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            fast_build: true,
            max_nodes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramebufferConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for FramebufferConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndirectConfig {
    pub enabled: bool,
    pub strength: f32,
}

impl Default for IndirectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 1.0,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub domain: Domain,
    pub polar: PolarConfig,
    pub distance_field: DistanceFieldConfig,
    pub probes: ProbeConfig,
    pub direct: DirectConfig,
    pub bvh: BvhConfig,
    pub framebuffer: FramebufferConfig,
    pub indirect: IndirectConfig,
}

impl Config {
    /// Load a config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> LightResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Save the config to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> LightResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check that every pass can be created from this config
    pub fn validate(&self) -> LightResult<()> {
        let size: Vec2 = self.domain.size();
        if !(size.x > 0.0 && size.y > 0.0 && size.is_finite()) {
            return Err(LightError::pass_setup("domain", "domain must have positive finite extent"));
        }

        if self.polar.resolution == 0 {
            return Err(LightError::pass_setup("polar", "angular resolution must be non-zero"));
        }
        if self.polar.max_lights == 0 {
            return Err(LightError::pass_setup("polar", "atlas needs at least one row"));
        }

        let df = &self.distance_field;
        if !df.resolution.is_power_of_two() || df.resolution < MIN_DF_MIP_SIZE {
            return Err(LightError::pass_setup(
                "distance_field",
                format!("resolution {} must be a power of two >= {}", df.resolution, MIN_DF_MIP_SIZE),
            ));
        }
        let max_mips = (df.resolution / MIN_DF_MIP_SIZE).ilog2();
        if df.mip_count > max_mips {
            return Err(LightError::pass_setup(
                "distance_field",
                format!("{} mips requested, at most {} fit", df.mip_count, max_mips),
            ));
        }

        let probes = &self.probes;
        if probes.resolution < 2 {
            return Err(LightError::pass_setup("probes", "grid needs at least 2x2 probes"));
        }
        if !probes.sample_size.is_power_of_two() {
            return Err(LightError::pass_setup(
                "probes",
                format!("sample size {} must be a power of two", probes.sample_size),
            ));
        }
        if !(0.0..=1.0).contains(&probes.seam_blend) {
            return Err(LightError::pass_setup("probes", "seam blend must lie in [0, 1]"));
        }

        if self.framebuffer.width == 0 || self.framebuffer.height == 0 {
            return Err(LightError::pass_setup("framebuffer", "framebuffer must be non-empty"));
        }
        if self.direct.penumbra && !(self.direct.penumbra_radius > 0.0) {
            return Err(LightError::pass_setup("direct", "penumbra radius must be positive"));
        }
        Ok(())
    }

    /// Distance-field bias: half a texel of the coarsest level, in uv units
    pub fn df_bias(&self) -> f32 {
        let df = &self.distance_field;
        0.5 / (df.resolution >> df.mip_count) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{ "polar": { "resolution": 64 } }"#).unwrap();
        assert_eq!(config.polar.resolution, 64);
        assert_eq!(config.polar.max_lights, 256);
        assert_eq!(config.probes.sample_size, 4);
        assert_eq!(config.distance_field.mip_strategy, MipStrategy::Downres);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut config = Config::default();
        config.polar.resolution = 2048;
        config.probes.ambient = Vec3::new(0.1, 0.2, 0.3);
        config.direct.draw_mode = DrawMode::Bounded;
        let path = std::env::temp_dir().join(format!("linelight-config-{}.json", std::process::id()));
        config.save(&path).unwrap();
        let back = Config::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back.polar.resolution, 2048);
        assert_eq!(back.probes.ambient, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(back.direct.draw_mode, DrawMode::Bounded);
    }

    #[test]
    fn test_too_many_mips_is_pass_setup() {
        let mut config = Config::default();
        config.distance_field.resolution = 64;
        config.distance_field.mip_count = 3;
        assert!(matches!(config.validate(), Err(LightError::PassSetup { pass: "distance_field", .. })));
        config.distance_field.mip_count = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_sample_size() {
        let mut config = Config::default();
        config.probes.sample_size = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_df_bias() {
        let mut config = Config::default();
        config.distance_field.resolution = 256;
        config.distance_field.mip_count = 2;
        assert!((config.df_bias() - 0.5 / 64.0).abs() < 1e-9);
    }
}
