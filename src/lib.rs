//! 2D light transport over line scenes
//!
//! A line BVH and distance field over a static set of segments, per-light
//! polar shadow maps for hard and soft direct shadows, and a probe grid
//! with circular-harmonic storage for one bounce of diffuse indirect light.
//! Every pass is a data-parallel kernel over an owned texture; [`Renderer`]
//! runs them in order.

pub mod bvh;
pub mod config;
pub mod direct;
pub mod display;
pub mod distance_field;
pub mod error;
pub mod format;
pub mod geometry;
pub mod harmonics;
pub mod light;
pub mod line_store;
pub mod polar;
pub mod probes;
pub mod renderer;
pub mod scene;
pub mod texture;
pub mod util;
pub mod visibility_polygon;

pub use bvh::LineBvh;
pub use config::Config;
pub use error::{ErrorKind, LightError, LightResult};
pub use geometry::{Domain, Line};
pub use light::PointLight;
pub use renderer::{FrameStatus, Renderer};
pub use scene::Scene;
