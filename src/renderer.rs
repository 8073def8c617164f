//! Frame orchestration
//!
//! Owns every pass resource and runs the passes in dependency order:
//! BVH and distance field, then polar maps and probes, then the integrator,
//! then direct and indirect accumulation into the HDR target. Inputs only
//! mark resources stale; the work happens in [`Renderer::render`].

use glam::{Vec2, Vec3};

use crate::bvh::LineBvh;
use crate::config::{Config, DrawMode};
use crate::direct::DirectLighting;
use crate::distance_field::DistanceField;
use crate::error::{ErrorKind, LightError, LightResult};
use crate::geometry::{Aabb2, Domain};
use crate::harmonics::{HarmonicTextures, IndirectSampler};
use crate::light::{LightStore, PointLight};
use crate::line_store::LineStore;
use crate::polar::PolarShadowMaps;
use crate::probes::{ProbeGrid, RadianceScene};
use crate::texture::Texture2d;
use crate::visibility_polygon::VisibilityPolygon;

/// Framebuffer colour after a failed pass setup
pub const ERROR_COLOR: Vec3 = Vec3::new(1.0, 0.0, 0.5);

/// What a frame did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStatus {
    /// Another frame would change the image
    pub redraw_requested: bool,
    /// Pass setup failed; the framebuffer holds [`ERROR_COLOR`]
    pub setup_failed: bool,
    pub polar_rows_rebuilt: usize,
    pub distance_field_rebuilt: bool,
    pub probes_updated: bool,
}

/// Resources made stale by input since the last frame
#[derive(Debug, Clone, Default)]
struct Invalidation {
    distance_field: bool,
    polar: bool,
    polar_rows: Vec<usize>,
    probe_radiance: bool,
}

impl Invalidation {
    fn all() -> Self {
        Self {
            distance_field: true,
            polar: true,
            polar_rows: Vec::new(),
            probe_radiance: true,
        }
    }
}

fn rejected(op: &str, e: LightError) -> LightError {
    log::warn!("{}: {}", op, e);
    e
}

pub struct Renderer {
    config: Config,
    setup_error: Option<String>,
    lines: LineStore,
    lights: LightStore,
    bvh: LineBvh,
    distance_field: Option<DistanceField>,
    polar: PolarShadowMaps,
    probes: ProbeGrid,
    harmonics: Option<HarmonicTextures>,
    framebuffer: Texture2d<Vec3>,
    stale: Invalidation,
    show_bounds: bool,
    frame: u64,
}

impl Renderer {
    /// Create every pass from `config`.
    ///
    /// A config that fails validation still yields a renderer: passes are
    /// built from the defaults and every frame clears to [`ERROR_COLOR`]
    /// until [`Renderer::reconfigure`] succeeds.
    pub fn new(config: Config) -> Self {
        let (active, setup_error) = match config.validate() {
            Ok(()) => (config, None),
            Err(e) => {
                log::warn!("renderer setup failed: {}", e);
                (Config::default(), Some(e.to_string()))
            },
        };
        Self {
            lights: LightStore::new(active.polar.max_lights as usize),
            polar: PolarShadowMaps::new(&active.polar),
            probes: ProbeGrid::new(&active.probes, active.domain),
            framebuffer: Texture2d::filled(active.framebuffer.width, active.framebuffer.height, Vec3::ZERO),
            distance_field: None,
            harmonics: None,
            stale: Invalidation::all(),
            show_bounds: false,
            frame: 0,
            config: active,
            setup_error,
            lines: LineStore::default(),
            bvh: LineBvh::default(),
        }
    }

    /// Reinstall the passes from a new config, keeping lines and lights.
    ///
    /// On failure the previous passes stay installed, except that a
    /// validation failure also puts the renderer into the error state.
    pub fn reconfigure(&mut self, config: Config) -> LightResult<()> {
        if let Err(e) = config.validate() {
            log::warn!("reconfigure rejected: {}", e);
            self.setup_error = Some(e.to_string());
            return Err(e);
        }
        let bvh = LineBvh::build(self.lines.lines(), &config.bvh)?;
        let mut lights = LightStore::new(config.polar.max_lights as usize);
        lights.set(self.lights.lights())?;

        self.polar = PolarShadowMaps::new(&config.polar);
        self.probes = ProbeGrid::new(&config.probes, config.domain);
        self.framebuffer = Texture2d::filled(config.framebuffer.width, config.framebuffer.height, Vec3::ZERO);
        self.distance_field = None;
        self.harmonics = None;
        self.bvh = bvh;
        self.lights = lights;
        self.config = config;
        self.setup_error = None;
        self.stale = Invalidation::all();
        log::info!("renderer reconfigured");
        Ok(())
    }

    /// Replace the line set. Rebuilds the BVH now; the distance field, every
    /// polar row and the probes follow on the next frame.
    pub fn set_lines(&mut self, lines: &[[f32; 4]]) -> LightResult<()> {
        let store = LineStore::new(lines).map_err(|e| rejected("set_lines", e))?;
        let bvh = LineBvh::build(store.lines(), &self.config.bvh).map_err(|e| rejected("set_lines", e))?;
        log::info!("lines: {} stored, {} BVH nodes", store.len(), bvh.node_count());
        self.lines = store;
        self.bvh = bvh;
        self.stale.distance_field = true;
        self.stale.polar = true;
        self.stale.probe_radiance = true;
        Ok(())
    }

    /// Replace the light set
    pub fn set_lights(&mut self, lights: &[PointLight]) -> LightResult<()> {
        self.lights.set(lights).map_err(|e| rejected("set_lights", e))?;
        log::info!("lights: {} active", self.lights.len());
        self.stale.polar = true;
        self.stale.probe_radiance = true;
        Ok(())
    }

    /// Translate one light; only its polar row is regenerated
    pub fn move_light(&mut self, index: usize, delta: Vec2) -> LightResult<()> {
        self.lights.translate(index, delta)?;
        if !self.stale.polar && !self.stale.polar_rows.contains(&index) {
            self.stale.polar_rows.push(index);
        }
        self.stale.probe_radiance = true;
        Ok(())
    }

    /// Regenerate every polar row on the next frame
    pub fn request_polar_rebuild(&mut self) {
        self.stale.polar = true;
    }

    /// Switch between full-screen and bounded light evaluation
    pub fn toggle_draw_mode(&mut self) -> DrawMode {
        let mode = match self.config.direct.draw_mode {
            DrawMode::Fullscreen => DrawMode::Bounded,
            DrawMode::Bounded => DrawMode::Fullscreen,
        };
        self.config.direct.draw_mode = mode;
        mode
    }

    pub fn toggle_bounds_overlay(&mut self) -> bool {
        self.show_bounds = !self.show_bounds;
        self.show_bounds
    }

    pub fn shows_bounds(&self) -> bool {
        self.show_bounds
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    pub fn lines(&self) -> &LineStore {
        &self.lines
    }

    pub fn lights(&self) -> &[PointLight] {
        self.lights.lights()
    }

    pub fn bvh(&self) -> &LineBvh {
        &self.bvh
    }

    pub fn distance_field(&self) -> Option<&DistanceField> {
        self.distance_field.as_ref()
    }

    pub fn polar(&self) -> &PolarShadowMaps {
        &self.polar
    }

    pub fn probes(&self) -> &ProbeGrid {
        &self.probes
    }

    pub fn harmonics(&self) -> Option<&HarmonicTextures> {
        self.harmonics.as_ref()
    }

    /// The HDR target written by the last frame
    pub fn framebuffer(&self) -> &Texture2d<Vec3> {
        &self.framebuffer
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Lit bounds of every light from the current polar rows
    pub fn light_bounds(&self) -> Vec<Aabb2> {
        self.lights()
            .iter()
            .enumerate()
            .map(|(i, light)| self.polar.light_bounds(i, light))
            .collect()
    }

    /// Visibility polygon of light `index` from its current polar row
    pub fn visibility_polygon(&self, index: usize) -> LightResult<VisibilityPolygon> {
        let light = self
            .lights
            .get(index)
            .ok_or_else(|| LightError::invalid(ErrorKind::LightIndexOutOfRange, index))?;
        Ok(VisibilityPolygon::from_polar_row(self.polar.base(), index as u32, light))
    }

    /// Render the configured domain
    pub fn render_domain(&mut self) -> FrameStatus {
        let window = self.config.domain;
        self.render(&window)
    }

    /// Run every stale pass, then light `window` into the framebuffer
    pub fn render(&mut self, window: &Domain) -> FrameStatus {
        self.frame += 1;
        let mut status = FrameStatus::default();

        if let Some(reason) = &self.setup_error {
            log::debug!("frame {}: setup failed ({}), clearing", self.frame, reason);
            self.framebuffer.fill(ERROR_COLOR);
            status.setup_failed = true;
            return status;
        }

        let stale = std::mem::take(&mut self.stale);
        let lights = self.lights.lights();
        let lines = self.lines.lines();

        // Geometry
        if stale.distance_field || self.distance_field.is_none() {
            self.distance_field = Some(DistanceField::generate(
                &self.bvh,
                self.config.domain,
                &self.config.distance_field,
                self.config.df_bias(),
            ));
            status.distance_field_rebuilt = true;
        }

        // Shadows
        if stale.polar {
            self.polar.rebuild_all(lines, lights);
            status.polar_rows_rebuilt = lights.len();
        } else {
            for &row in &stale.polar_rows {
                if let Some(light) = lights.get(row) {
                    self.polar.rebuild_row(row, lines, light);
                    status.polar_rows_rebuilt += 1;
                }
            }
        }

        // Probes and integration
        if self.config.indirect.enabled {
            if let Some(df) = &self.distance_field {
                let probe_config = &self.config.probes;
                let scene_changed = stale.probe_radiance || stale.distance_field;
                if scene_changed {
                    self.probes.reset_accumulation();
                }
                let accumulating = probe_config.accumulation_frames > 0 && !self.probes.is_converged();
                if scene_changed || accumulating || self.harmonics.is_none() {
                    let scene = RadianceScene {
                        bvh: &self.bvh,
                        lines,
                        lights,
                        ambient: probe_config.ambient,
                        albedo: probe_config.albedo,
                    };
                    if self.probes.update(df, &scene) || self.harmonics.is_none() {
                        self.harmonics = Some(HarmonicTextures::integrate(&self.probes));
                        status.probes_updated = true;
                    }
                }
                status.redraw_requested =
                    probe_config.accumulation_frames > 0 && !self.probes.is_converged();
            }
        }

        // Accumulation
        DirectLighting::new(&self.polar, lights, &self.config.direct).render(&mut self.framebuffer, window);
        if self.config.indirect.enabled {
            if let Some(harmonics) = &self.harmonics {
                IndirectSampler::new(harmonics, &self.probes).render(
                    &mut self.framebuffer,
                    window,
                    self.config.indirect.strength,
                );
            }
        }

        log::debug!(
            "frame {}: {} polar rows, df {}, probes {}",
            self.frame,
            status.polar_rows_rebuilt,
            status.distance_field_rebuilt,
            status.probes_updated
        );
        status
    }
}
