//! Image geometry: dimensions, origins and bounds checks

use crate::{Error, Result};
use std::fmt;

/// Extent of an image, buffer or transfer region
///
/// Up to three axes. Unused trailing axes are stored as 1 so that
/// [`Dims::volume`] is always the product of the declared axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    extent: [usize; 3],
    rank: usize,
}

impl Dims {
    /// One-dimensional extent
    pub const fn d1(width: usize) -> Self {
        Self { extent: [width, 1, 1], rank: 1 }
    }

    /// Two-dimensional extent
    pub const fn d2(width: usize, height: usize) -> Self {
        Self { extent: [width, height, 1], rank: 2 }
    }

    /// Three-dimensional extent
    pub const fn d3(width: usize, height: usize, depth: usize) -> Self {
        Self { extent: [width, height, depth], rank: 3 }
    }

    /// Build from a slice of one to three axes
    pub fn from_slice(axes: &[usize]) -> Result<Self> {
        match *axes {
            [w] => Ok(Self::d1(w)),
            [w, h] => Ok(Self::d2(w, h)),
            [w, h, d] => Ok(Self::d3(w, h, d)),
            _ => Err(Error::InvalidParameter(format!(
                "geometry needs 1 to 3 axes, got {}",
                axes.len()
            ))),
        }
    }

    /// Number of declared axes
    #[inline]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Extent padded to three axes
    #[inline]
    pub const fn as_array(&self) -> [usize; 3] {
        self.extent
    }

    /// Width (x axis)
    #[inline]
    pub const fn width(&self) -> usize {
        self.extent[0]
    }

    /// Height (y axis), 1 for one-dimensional extents
    #[inline]
    pub const fn height(&self) -> usize {
        self.extent[1]
    }

    /// Depth (z axis), 1 below three dimensions
    #[inline]
    pub const fn depth(&self) -> usize {
        self.extent[2]
    }

    /// Product of all axes
    pub fn volume(&self) -> usize {
        self.extent.iter().product()
    }

    /// Product of all axes, `None` on overflow
    pub fn checked_volume(&self) -> Option<usize> {
        self.extent.iter().try_fold(1usize, |acc, &axis| acc.checked_mul(axis))
    }

    /// Reject zero-sized axes and overflowing volumes
    pub fn validate(&self) -> Result<()> {
        if let Some(axis) = self.extent[..self.rank].iter().position(|&e| e == 0) {
            return Err(Error::InvalidParameter(format!(
                "axis {} of {} has zero extent",
                axis, self
            )));
        }
        if self.checked_volume().is_none() {
            return Err(Error::InvalidParameter(format!("volume of {} overflows", self)));
        }
        Ok(())
    }
}

impl From<(usize, usize)> for Dims {
    fn from((w, h): (usize, usize)) -> Self {
        Self::d2(w, h)
    }
}

impl From<(usize, usize, usize)> for Dims {
    fn from((w, h, d): (usize, usize, usize)) -> Self {
        Self::d3(w, h, d)
    }
}

impl From<usize> for Dims {
    fn from(w: usize) -> Self {
        Self::d1(w)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            1 => write!(f, "({})", self.extent[0]),
            2 => write!(f, "({}, {})", self.extent[0], self.extent[1]),
            _ => write!(f, "({}, {}, {})", self.extent[0], self.extent[1], self.extent[2]),
        }
    }
}

/// Starting corner of a transfer region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Origin(pub [usize; 3]);

impl Origin {
    /// The (0, 0, 0) corner
    pub const ZERO: Origin = Origin([0, 0, 0]);

    /// Origin from its three coordinates
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self([x, y, z])
    }
}

impl From<(usize, usize)> for Origin {
    fn from((x, y): (usize, usize)) -> Self {
        Self([x, y, 0])
    }
}

impl From<(usize, usize, usize)> for Origin {
    fn from((x, y, z): (usize, usize, usize)) -> Self {
        Self([x, y, z])
    }
}

/// A box within a memory object, in elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// First element on each axis
    pub origin: Origin,
    /// Number of elements on each axis
    pub extent: Dims,
}

impl Region {
    /// Region from origin and extent
    pub const fn new(origin: Origin, extent: Dims) -> Self {
        Self { origin, extent }
    }

    /// The whole of an object with extent `dims`
    pub const fn whole(dims: Dims) -> Self {
        Self { origin: Origin::ZERO, extent: dims }
    }

    /// Elements covered by the region
    pub fn volume(&self) -> usize {
        self.extent.volume()
    }

    /// Whether the region covers all of `dims`
    pub fn covers(&self, dims: &Dims) -> bool {
        self.origin == Origin::ZERO && self.extent.as_array() == dims.as_array()
    }

    /// Check that the region lies inside `dims`
    ///
    /// # Errors
    /// `OutOfBounds` naming the first axis that overflows,
    /// `InvalidParameter` for a zero-sized region
    pub fn check_within(&self, dims: &Dims) -> Result<()> {
        self.extent.validate()?;

        let limits = dims.as_array();
        let extent = self.extent.as_array();
        for axis in 0..3 {
            let origin = self.origin.0[axis];
            let end = origin.checked_add(extent[axis]);
            if end.is_none_or(|end| end > limits[axis]) {
                return Err(Error::out_of_bounds(axis, origin, extent[axis], limits[axis]));
            }
        }
        Ok(())
    }
}
