// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Geospatial cluster engine for contact maps.
//!
//! Decides, per zoom level, whether each group of geocoded contacts is drawn as one
//! aggregate bubble or as individual markers, spreads out groups whose centroids
//! coincide, and keeps the marker handles it created in sync with a host map
//! through the [`surface::MapSurface`] capability.

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod geometry;
pub mod headless;
pub mod lod;
pub mod manager;
pub mod marker;
pub mod spiderfy;
pub mod surface;
pub mod wide_group;

pub use cluster::{ClusterBuild, ClusterRecord, Contact, GeocodedContact, Group, build_clusters};
pub use config::{ClusterOptions, ZoomThresholds};
pub use error::{ClusterError, SurfaceError};
pub use geometry::{Bounds, LatLng};
pub use manager::{ClusterManager, ClusterState};
pub use marker::WideGroupNotice;
pub use surface::{MapEvent, MapSurface, MarkerId};
