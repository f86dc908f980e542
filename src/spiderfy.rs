// Copyright Catenary Transit Initiatives
// Deterministic offsets for cluster centroids that land on the same spot

use crate::geometry::LatLng;
use ahash::AHashMap;

pub const DEFAULT_COLLISION_OFFSET_DEG: f64 = 0.015;

/// Radians added per extra occupant of the same position key.
const ANGLE_STEP_RAD: f64 = 0.5;

/// Five decimal places, about 1.1 m at the equator.
const POSITION_KEY_SCALE: f64 = 100_000.0;

/// Centroid rounded to the 5-decimal grid, stored as scaled integers so it can be hashed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PositionKey {
    lat_e5: i64,
    lng_e5: i64,
}

impl PositionKey {
    pub fn from_position(position: LatLng) -> Self {
        Self {
            lat_e5: (position.latitude * POSITION_KEY_SCALE).round() as i64,
            lng_e5: (position.longitude * POSITION_KEY_SCALE).round() as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: LatLng,
    pub is_adjusted: bool,
}

/// Places centroids one at a time, in the order groups are processed.
///
/// The first centroid at a key keeps its position. Occupant `n >= 1` is pushed out
/// `offset * sqrt(n)` degrees at `n * 0.5` radians, so later occupants spiral outward.
#[derive(Debug)]
pub struct CollisionResolver {
    collision_offset: f64,
    occupants: AHashMap<PositionKey, u32>,
}

impl CollisionResolver {
    pub fn new(collision_offset: f64) -> Self {
        Self {
            collision_offset,
            occupants: AHashMap::new(),
        }
    }

    pub fn place(&mut self, centroid: LatLng) -> Placement {
        let key = PositionKey::from_position(centroid);
        let occupants = self.occupants.entry(key).or_insert(0);
        let n = *occupants;
        *occupants += 1;

        if n == 0 {
            return Placement {
                position: centroid,
                is_adjusted: false,
            };
        }

        let angle = f64::from(n) * ANGLE_STEP_RAD;
        let separation = self.collision_offset * f64::from(n).sqrt();

        tracing::debug!(
            "Spiderfying centroid ({}, {}) as occupant {} with separation {}",
            centroid.latitude,
            centroid.longitude,
            n,
            separation
        );

        Placement {
            position: LatLng::new(
                centroid.latitude + separation * angle.cos(),
                centroid.longitude + separation * angle.sin(),
            ),
            is_adjusted: true,
        }
    }

    /// Number of centroids placed at the key `position` rounds to.
    pub fn occupants_at(&self, position: LatLng) -> u32 {
        self.occupants
            .get(&PositionKey::from_position(position))
            .copied()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.occupants.clear();
    }
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_COLLISION_OFFSET_DEG)
    }
}
