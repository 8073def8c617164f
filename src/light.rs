//! Point lights and their packed transport layout

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, LightError, LightResult, Resource};
use crate::format::{pack_r11g11b10, unpack_r11g11b10};

/// A point light with a finite radius of influence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec2,
    /// Radius of influence; also the decay parameter of the attenuation curve
    pub radius: f32,
    pub color: Vec3,
}

impl PointLight {
    pub fn new(position: Vec2, radius: f32, color: Vec3) -> Self {
        Self {
            position,
            radius,
            color,
        }
    }

    /// `[x, y, decay, packed_rgb]` as raw bits
    pub fn pack(&self) -> [u32; 4] {
        [
            self.position.x.to_bits(),
            self.position.y.to_bits(),
            self.radius.to_bits(),
            pack_r11g11b10(self.color),
        ]
    }

    pub fn unpack(words: [u32; 4]) -> Self {
        Self {
            position: Vec2::new(f32::from_bits(words[0]), f32::from_bits(words[1])),
            radius: f32::from_bits(words[2]),
            color: unpack_r11g11b10(words[3]),
        }
    }

    fn validate(&self, index: usize) -> LightResult<()> {
        if !(self.position.is_finite() && self.color.is_finite() && self.radius.is_finite()) {
            return Err(LightError::invalid(ErrorKind::NonFiniteCoordinate, index));
        }
        if self.radius <= 0.0 {
            return Err(LightError::invalid(ErrorKind::NonPositiveRadius, index));
        }
        Ok(())
    }
}

/// The active light set; index `i` owns polar atlas row `i`
#[derive(Debug, Clone)]
pub struct LightStore {
    lights: Vec<PointLight>,
    packed: Vec<[u32; 4]>,
    max_lights: usize,
}

impl LightStore {
    pub fn new(max_lights: usize) -> Self {
        Self {
            lights: Vec::new(),
            packed: Vec::new(),
            max_lights,
        }
    }

    /// Replace the whole set; on error the previous set is kept
    pub fn set(&mut self, lights: &[PointLight]) -> LightResult<()> {
        if lights.len() > self.max_lights {
            return Err(LightError::exhausted(Resource::PolarRows, lights.len(), self.max_lights));
        }
        for (index, light) in lights.iter().enumerate() {
            light.validate(index)?;
        }
        self.lights = lights.to_vec();
        self.packed = self.lights.iter().map(PointLight::pack).collect();
        Ok(())
    }

    /// Offset one light's position
    pub fn translate(&mut self, index: usize, delta: Vec2) -> LightResult<()> {
        let Some(light) = self.lights.get(index) else {
            return Err(LightError::invalid(ErrorKind::LightIndexOutOfRange, index));
        };
        let moved = PointLight {
            position: light.position + delta,
            ..*light
        };
        moved.validate(index)?;
        self.lights[index] = moved;
        self.packed[index] = moved.pack();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn max_lights(&self) -> usize {
        self.max_lights
    }

    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    pub fn get(&self, index: usize) -> Option<&PointLight> {
        self.lights.get(index)
    }

    pub fn packed(&self) -> &[[u32; 4]] {
        &self.packed
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(x: f32, y: f32, radius: f32) -> PointLight {
        PointLight::new(Vec2::new(x, y), radius, Vec3::new(1.0, 0.5, 0.25))
    }

    #[test]
    fn test_pack_layout() {
        let l = light(0.25, 0.75, 2.0);
        let words = l.pack();
        assert_eq!(words[0], 0.25_f32.to_bits());
        assert_eq!(words[2], 2.0_f32.to_bits());
        assert_eq!(PointLight::unpack(words), l);
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let mut store = LightStore::new(4);
        store.set(&[light(0.5, 0.5, 1.0)]).unwrap();
        let err = store.set(&[light(0.1, 0.1, 1.0), light(0.5, 0.5, 0.0)]).unwrap_err();
        assert!(matches!(
            err,
            LightError::InvalidInput {
                kind: ErrorKind::NonPositiveRadius,
                index: 1
            }
        ));
        // Previous state survives
        assert_eq!(store.len(), 1);
        assert_eq!(store.lights()[0].position, Vec2::new(0.5, 0.5));
    }

    #[test]
    fn test_too_many_lights() {
        let mut store = LightStore::new(2);
        let lights = vec![light(0.5, 0.5, 1.0); 3];
        assert!(matches!(
            store.set(&lights),
            Err(LightError::ResourceExhausted {
                resource: Resource::PolarRows,
                requested: 3,
                limit: 2
            })
        ));
    }

    #[test]
    fn test_translate() {
        let mut store = LightStore::new(2);
        store.set(&[light(0.5, 0.5, 1.0)]).unwrap();
        store.translate(0, Vec2::new(0.1, 0.0)).unwrap();
        assert!((store.lights()[0].position.x - 0.6).abs() < 1e-6);
        assert_eq!(store.packed()[0], store.lights()[0].pack());
        assert_eq!(
            store.translate(3, Vec2::ZERO).unwrap_err().kind(),
            Some(ErrorKind::LightIndexOutOfRange)
        );
    }
}
