// Copyright Catenary Transit Initiatives
// Boundary to the host's map renderer

use crate::error::SurfaceError;
use crate::geometry::{Bounds, LatLng};
use crate::marker::MarkerContent;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Opaque handle to a marker owned by the map surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapEventKind {
    ZoomChanged,
    Idle,
    MarkerClicked,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MapEvent {
    ZoomChanged,
    Idle,
    MarkerClicked(MarkerId),
}

impl MapEvent {
    pub fn kind(&self) -> MapEventKind {
        match self {
            MapEvent::ZoomChanged => MapEventKind::ZoomChanged,
            MapEvent::Idle => MapEventKind::Idle,
            MapEvent::MarkerClicked(_) => MapEventKind::MarkerClicked,
        }
    }
}

/// Everything the engine needs from the host map.
///
/// Markers are created detached. Only the engine that created a marker attaches,
/// detaches or removes it.
pub trait MapSurface: Send + Sync {
    /// Resolves once markers can be created. Failing here aborts `initialize()`.
    fn load_marker_library(&self) -> BoxFuture<'_, Result<(), SurfaceError>>;

    fn create_marker(&self, position: LatLng, content: &MarkerContent, title: &str) -> MarkerId;

    fn attach_marker(&self, marker: MarkerId);

    fn detach_marker(&self, marker: MarkerId);

    /// Releases the marker. It will not be referenced again.
    fn remove_marker(&self, marker: MarkerId);

    /// Forward events of `kind` into `sink` until [`MapSurface::remove_listener`] is called.
    fn add_listener(&self, kind: MapEventKind, sink: UnboundedSender<MapEvent>) -> ListenerId;

    fn remove_listener(&self, listener: ListenerId);

    fn zoom(&self) -> f64;

    fn set_zoom(&self, zoom: f64);

    fn pan_to(&self, position: LatLng);

    fn fit_bounds(&self, bounds: Bounds, padding_px: u32);
}
