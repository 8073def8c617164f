//! Immutable validated line set
//!
//! Line ids are insertion indices. The packed buffer is `float32[4]` per line
//! in insertion order, ready to hand to any consumer that wants raw bytes.

use std::collections::HashSet;

use glam::Vec2;

use crate::error::{ErrorKind, LightError, LightResult};
use crate::geometry::{Line, EPSILON};

#[derive(Debug, Clone, Default)]
pub struct LineStore {
    lines: Vec<Line>,
    packed: Vec<[f32; 4]>,
}

/// Order-independent bit key so `(a, b)` and `(b, a)` collide
fn line_key(line: &Line) -> [u32; 4] {
    let bits = |p: Vec2| [p.x.to_bits(), p.y.to_bits()];
    let (a, b) = (bits(line.a), bits(line.b));
    if a <= b {
        [a[0], a[1], b[0], b[1]]
    } else {
        [b[0], b[1], a[0], a[1]]
    }
}

impl LineStore {
    /// Validate and store `lines`. The first offending line fails the whole call.
    pub fn new(lines: &[[f32; 4]]) -> LightResult<Self> {
        let mut seen = HashSet::with_capacity(lines.len());
        let mut stored = Vec::with_capacity(lines.len());

        for (index, raw) in lines.iter().enumerate() {
            let line = Line::from_array(*raw);
            if !line.is_finite() {
                return Err(LightError::invalid(ErrorKind::NonFiniteCoordinate, index));
            }
            if line.length_squared() <= EPSILON * EPSILON {
                return Err(LightError::invalid(ErrorKind::ZeroLengthLine, index));
            }
            // -0.0 and 0.0 must compare equal
            let normalized = Line::new(line.a + Vec2::ZERO, line.b + Vec2::ZERO);
            if !seen.insert(line_key(&normalized)) {
                return Err(LightError::invalid(ErrorKind::DuplicateLine, index));
            }
            stored.push(line);
        }

        log::debug!("line store: {} lines", stored.len());
        Ok(Self {
            packed: stored.iter().map(|l| l.to_array()).collect(),
            lines: stored,
        })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Line> {
        self.lines.get(id as usize)
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Packed `float32[4]` records, one per line
    pub fn packed(&self) -> &[[f32; 4]] {
        &self.packed
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.packed)
    }
}
