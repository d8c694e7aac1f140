//! Tile coordinates and range validation.

use std::fmt;
use std::str::FromStr;

/// Highest zoom level the service accepts in configuration.
///
/// At zoom 30 the tile index still fits a PostgreSQL `integer`.
pub const MAX_ZOOM: u32 = 30;

/// A tile address in the XYZ scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub const fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// The tile covering the same area at another zoom level.
    ///
    /// Zooming out returns the ancestor; zooming in returns the top-left
    /// descendant.
    pub fn at_zoom(self, z: u32) -> Self {
        if z <= self.z {
            let shift = self.z - z;
            Self::new(z, self.x >> shift, self.y >> shift)
        } else {
            let shift = z - self.z;
            Self::new(z, self.x << shift, self.y << shift)
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for TileCoord {
    type Err = String;

    /// Parse `z/x/y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(format!("expected z/x/y, got '{}'", s));
        }
        let parse = |name: &str, value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| format!("invalid {} in '{}': {}", name, s, value))
        };
        Ok(Self::new(
            parse("zoom", parts[0])?,
            parse("x", parts[1])?,
            parse("y", parts[2])?,
        ))
    }
}

// =============================================================================
// CoordinateValidator
// =============================================================================

/// Validates tile coordinates against the configured zoom range.
///
/// The per-zoom upper bound is computed once: `2^z` inside
/// `[minzoom, maxzoom]`, `0` below `minzoom` so that every tile at those
/// zooms is rejected.
#[derive(Debug, Clone)]
pub struct CoordinateValidator {
    minzoom: u32,
    maxzoom: u32,
    max_coord: Vec<u64>,
}

impl CoordinateValidator {
    /// Create a validator. `maxzoom` is clamped to [`MAX_ZOOM`].
    pub fn new(minzoom: u32, maxzoom: u32) -> Self {
        let maxzoom = maxzoom.min(MAX_ZOOM);
        let max_coord = (0..=maxzoom)
            .map(|z| if z >= minzoom { 1u64 << z } else { 0 })
            .collect();
        Self {
            minzoom,
            maxzoom,
            max_coord,
        }
    }

    pub fn minzoom(&self) -> u32 {
        self.minzoom
    }

    pub fn maxzoom(&self) -> u32 {
        self.maxzoom
    }

    /// Check a raw `(z, x, y)` triple, which may be negative.
    pub fn is_valid(&self, z: i64, x: i64, y: i64) -> bool {
        if z < 0 || x < 0 || y < 0 {
            return false;
        }
        match self.max_coord.get(z as usize) {
            Some(&max) => (x as u64) < max && (y as u64) < max,
            None => false,
        }
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.is_valid(coord.z.into(), coord.x.into(), coord.y.into())
    }
}
