// Copyright Catenary Transit Initiatives
// Small-scale geometry over WGS84 lat/lng points for cluster placement

use geo::{BoundingRect, Centroid};
use geo_types::{Coord, MultiPoint, Point, Rect};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every haversine distance in this crate, in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const MIN_CLUSTER_RADIUS: f64 = 50.0;
pub const MAX_CLUSTER_RADIUS: f64 = 500.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the WGS84 lat/lng ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// geo stores x = longitude, y = latitude
impl From<LatLng> for Point<f64> {
    fn from(p: LatLng) -> Self {
        Point::new(p.longitude, p.latitude)
    }
}

impl From<Point<f64>> for LatLng {
    fn from(p: Point<f64>) -> Self {
        LatLng::new(p.y(), p.x())
    }
}

impl From<Coord<f64>> for LatLng {
    fn from(c: Coord<f64>) -> Self {
        LatLng::new(c.y, c.x)
    }
}

/// Expanding lat/lng box, the shape `fit_bounds` consumes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    pub fn from_point(point: LatLng) -> Self {
        Self {
            south_west: point,
            north_east: point,
        }
    }

    /// Grows the box so it contains `point`.
    pub fn extend(&mut self, point: LatLng) {
        self.south_west.latitude = self.south_west.latitude.min(point.latitude);
        self.south_west.longitude = self.south_west.longitude.min(point.longitude);
        self.north_east.latitude = self.north_east.latitude.max(point.latitude);
        self.north_east.longitude = self.north_east.longitude.max(point.longitude);
    }

    pub fn contains(&self, point: LatLng) -> bool {
        (self.south_west.latitude..=self.north_east.latitude).contains(&point.latitude)
            && (self.south_west.longitude..=self.north_east.longitude).contains(&point.longitude)
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.latitude + self.north_east.latitude) / 2.0,
            (self.south_west.longitude + self.north_east.longitude) / 2.0,
        )
    }

    pub fn is_single_point(&self) -> bool {
        self.south_west == self.north_east
    }
}

impl From<Rect<f64>> for Bounds {
    fn from(rect: Rect<f64>) -> Self {
        Bounds {
            south_west: rect.min().into(),
            north_east: rect.max().into(),
        }
    }
}

impl From<Bounds> for Rect<f64> {
    fn from(bounds: Bounds) -> Self {
        Rect::new(
            Coord {
                x: bounds.south_west.longitude,
                y: bounds.south_west.latitude,
            },
            Coord {
                x: bounds.north_east.longitude,
                y: bounds.north_east.latitude,
            },
        )
    }
}

fn to_multi_point(points: &[LatLng]) -> MultiPoint<f64> {
    points.iter().map(|p| Point::from(*p)).collect()
}

/// Haversine great-circle distance in metres.
pub fn distance(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Arithmetic mean of latitudes and longitudes. Not geodesically exact.
///
/// Returns `None` for an empty slice.
pub fn centroid(points: &[LatLng]) -> Option<LatLng> {
    to_multi_point(points).centroid().map(LatLng::from)
}

/// Largest haversine distance over every unordered pair, in kilometres.
///
/// Zero for fewer than two points.
pub fn max_pairwise_distance_km(points: &[LatLng]) -> f64 {
    points
        .iter()
        .tuple_combinations()
        .map(|(a, b)| distance(*a, *b))
        .fold(0.0_f64, f64::max)
        / 1000.0
}

/// Smallest lat/lng box containing every point.
pub fn bounding_box(points: &[LatLng]) -> Option<Bounds> {
    to_multi_point(points).bounding_rect().map(Bounds::from)
}

/// Advisory radius: furthest member from `center`, clamped to 50..=500.
pub fn radius(points: &[LatLng], center: LatLng) -> f64 {
    points
        .iter()
        .map(|p| distance(center, *p))
        .fold(0.0_f64, f64::max)
        .clamp(MIN_CLUSTER_RADIUS, MAX_CLUSTER_RADIUS)
}
