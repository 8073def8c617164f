use std::fs;
use std::path::Path;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::LightResult;
use crate::geometry::Domain;
use crate::light::PointLight;

/// A polyline; closed outlines gain an edge from the last point to the first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub points: Vec<Vec2>,
    #[serde(default = "default_closed")]
    pub closed: bool,
}

fn default_closed() -> bool {
    true
}

impl Outline {
    pub fn closed(points: Vec<Vec2>) -> Self {
        Self { points, closed: true }
    }

    /// Edge lines as `[ax, ay, bx, by]`
    pub fn edges(&self) -> Vec<[f32; 4]> {
        let n = self.points.len();
        if n < 2 {
            return Vec::new();
        }
        let count = if self.closed && n > 2 { n } else { n - 1 };
        (0..count)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                [a.x, a.y, b.x, b.y]
            })
            .collect()
    }
}

/// Everything needed to light a frame: the domain, its lines and its lights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub lines: Vec<[f32; 4]>,
    #[serde(default)]
    pub outlines: Vec<Outline>,
    #[serde(default)]
    pub lights: Vec<PointLight>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: Domain::default(),
            lines: Vec::new(),
            outlines: Vec::new(),
            lights: Vec::new(),
        }
    }

    pub fn add_line(&mut self, a: Vec2, b: Vec2) {
        self.lines.push([a.x, a.y, b.x, b.y]);
    }

    pub fn add_outline(&mut self, outline: Outline) {
        self.outlines.push(outline);
    }

    pub fn add_light(&mut self, light: PointLight) {
        self.lights.push(light);
    }

    /// Free lines followed by every outline edge, in declaration order
    pub fn line_data(&self) -> Vec<[f32; 4]> {
        let mut lines = self.lines.clone();
        lines.extend(self.outlines.iter().flat_map(Outline::edges));
        lines
    }

    /// Save scene to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> LightResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load scene from a JSON file
    pub fn load(path: impl AsRef<Path>) -> LightResult<Self> {
        let json = fs::read_to_string(path)?;
        let scene = serde_json::from_str(&json)?;
        Ok(scene)
    }

    /// Nested wedge pattern in `[-1, 1]²` lit by a 10x10 grid of white lights
    pub fn demo() -> Self {
        const PATTERN: [[f32; 4]; 5] = [
            [-1.0, -1.0, -1.0, 0.5],
            [-1.0, -1.0, 1.0, -1.1],
            [1.0, 1.0, -0.5, 1.0],
            [0.5, 0.5, 1.0, -0.5],
            [-0.317080949074, 0.1788264608952, -0.1824981088947, 0.292159378941],
        ];
        const SCALES: [f32; 6] = [0.125, 0.25, 0.325, 0.5, 0.625, 0.75];

        let mut scene = Self::new("demo");
        scene.domain = Domain::SIGNED;
        for s in SCALES {
            scene
                .lines
                .extend(PATTERN.iter().map(|l| [l[0] * s, l[1] * s, l[2] * s, l[3] * s]));
        }
        for y in -5..5 {
            for x in -5..5 {
                let position = Vec2::new((x as f32 + 0.5) * 0.1, (y as f32 + 0.5) * 0.1);
                scene.add_light(PointLight::new(position, 1.0, Vec3::ONE));
            }
        }
        scene
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new("untitled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_store::LineStore;

    #[test]
    fn test_closed_outline_edges() {
        let square = Outline::closed(vec![
            Vec2::new(0.2, 0.2),
            Vec2::new(0.8, 0.2),
            Vec2::new(0.8, 0.8),
            Vec2::new(0.2, 0.8),
        ]);
        let edges = square.edges();
        assert_eq!(edges.len(), 4);
        assert_eq!(edges[3], [0.2, 0.8, 0.2, 0.2]);

        let open = Outline {
            closed: false,
            ..square
        };
        assert_eq!(open.edges().len(), 3);
    }

    #[test]
    fn test_demo_scene_is_valid() {
        let scene = Scene::demo();
        assert_eq!(scene.lines.len(), 30);
        assert_eq!(scene.lights.len(), 100);
        assert!(LineStore::new(&scene.line_data()).is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut scene = Scene::new("box");
        scene.add_line(Vec2::new(0.1, 0.1), Vec2::new(0.9, 0.1));
        scene.add_outline(Outline::closed(vec![
            Vec2::new(0.3, 0.3),
            Vec2::new(0.6, 0.3),
            Vec2::new(0.6, 0.6),
        ]));
        scene.add_light(PointLight::new(Vec2::new(0.5, 0.5), 0.4, Vec3::new(1.0, 0.5, 0.25)));

        let path = std::env::temp_dir().join(format!("linelight-scene-{}.json", std::process::id()));
        scene.save(&path).unwrap();
        let back = Scene::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back.name, "box");
        assert_eq!(back.line_data(), scene.line_data());
        assert_eq!(back.lights, scene.lights);
    }

    #[test]
    fn test_missing_sections_default() {
        let scene: Scene = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert!(scene.line_data().is_empty());
        assert_eq!(scene.domain, Domain::UNIT);
    }
}
