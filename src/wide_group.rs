// Copyright Catenary Transit Initiatives
// Flags groups whose members are spread too far apart to zoom onto directly

use crate::geometry::{LatLng, max_pairwise_distance_km};

pub const DEFAULT_WIDE_GROUP_THRESHOLD_KM: f64 = 500.0;

/// A group is wide when its furthest pair of members is more than
/// `threshold_km` apart. Groups with fewer than two members never are.
pub fn is_wide(points: &[LatLng], threshold_km: f64) -> bool {
    if points.len() < 2 {
        return false;
    }

    is_wide_distance(max_pairwise_distance_km(points), threshold_km)
}

/// Same test when the pairwise maximum is already known.
pub fn is_wide_distance(max_pairwise_km: f64, threshold_km: f64) -> bool {
    max_pairwise_km > threshold_km
}
