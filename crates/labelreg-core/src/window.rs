//! Spatial window sizes used by samplers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// A 3D sampling window `[D, H, W]` with every extent at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct WindowShape([usize; 3]);

impl WindowShape {
    pub fn new(extents: [usize; 3]) -> Result<Self> {
        if extents.iter().any(|e| *e == 0) {
            return Err(CoreError::invalid_window(format!(
                "extents must be positive, got {:?}",
                extents
            )));
        }
        Ok(Self(extents))
    }

    /// Build a window from a config list of exactly three extents.
    pub fn from_slice(extents: &[usize]) -> Result<Self> {
        match *extents {
            [d, h, w] => Self::new([d, h, w]),
            _ => Err(CoreError::invalid_window(format!(
                "expected 3 extents [D, H, W], got {:?}",
                extents
            ))),
        }
    }

    pub fn extents(&self) -> [usize; 3] {
        self.0
    }

    pub fn num_voxels(&self) -> usize {
        self.0.iter().product()
    }

    /// Whether every extent is a multiple of `divisor`.
    pub fn is_divisible_by(&self, divisor: usize) -> bool {
        divisor > 0 && self.0.iter().all(|e| e % divisor == 0)
    }
}

impl TryFrom<Vec<usize>> for WindowShape {
    type Error = CoreError;

    fn try_from(value: Vec<usize>) -> Result<Self> {
        Self::from_slice(&value)
    }
}

impl From<WindowShape> for Vec<usize> {
    fn from(value: WindowShape) -> Self {
        value.0.to_vec()
    }
}

impl fmt::Display for WindowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.0[0], self.0[1], self.0[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_extent() {
        assert!(WindowShape::new([4, 0, 4]).is_err());
    }

    #[test]
    fn test_requires_three_extents() {
        let window = WindowShape::from_slice(&[4, 16, 8]).unwrap();
        assert_eq!(window.extents(), [4, 16, 8]);
        assert_eq!(window.num_voxels(), 512);

        assert!(WindowShape::from_slice(&[16, 8]).is_err());
        assert!(WindowShape::from_slice(&[2, 2, 2, 2]).is_err());
        assert!(WindowShape::try_from(vec![16, 8]).is_err());
    }

    #[test]
    fn test_divisibility() {
        let window = WindowShape::new([16, 32, 8]).unwrap();
        assert!(window.is_divisible_by(8));
        assert!(!window.is_divisible_by(16));
        assert!(!window.is_divisible_by(0));
    }

    #[test]
    fn test_display() {
        let window = WindowShape::new([2, 3, 4]).unwrap();
        assert_eq!(window.to_string(), "2x3x4");
    }
}
