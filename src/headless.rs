// Copyright Catenary Transit Initiatives
// In-memory map surface: renders nothing, records everything

use crate::error::SurfaceError;
use crate::geometry::{Bounds, LatLng};
use crate::marker::MarkerContent;
use crate::surface::{ListenerId, MapEvent, MapEventKind, MapSurface, MarkerId};
use ahash::AHashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Debug, Serialize)]
pub struct HeadlessMarker {
    pub position: LatLng,
    pub content: MarkerContent,
    pub title: String,
    pub attached: bool,
}

/// Viewport commands issued by the engine, in order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ViewportCommand {
    SetZoom(f64),
    PanTo(LatLng),
    FitBounds { bounds: Bounds, padding_px: u32 },
}

#[derive(Default)]
struct Inner {
    zoom: f64,
    next_marker: u64,
    next_listener: u64,
    markers: BTreeMap<MarkerId, HeadlessMarker>,
    listeners: AHashMap<ListenerId, (MapEventKind, UnboundedSender<MapEvent>)>,
    viewport_commands: Vec<ViewportCommand>,
    visibility_calls: usize,
    created_total: usize,
    library_failure: Option<String>,
}

pub struct HeadlessSurface {
    inner: Mutex<Inner>,
}

impl HeadlessSurface {
    pub fn new(zoom: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                zoom,
                ..Default::default()
            }),
        }
    }

    /// A surface whose marker library never loads.
    pub fn failing(reason: &str) -> Self {
        let surface = Self::new(0.0);
        surface.lock().library_failure = Some(reason.to_string());
        surface
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` to every listener registered for its kind.
    pub fn emit(&self, event: MapEvent) {
        let mut inner = self.lock();
        // drop listeners whose receiver is gone
        inner
            .listeners
            .retain(|_, (kind, sink)| *kind != event.kind() || sink.send(event).is_ok());
    }

    /// Host-side zoom: moves the viewport and fires `ZoomChanged`.
    pub fn user_zoom(&self, zoom: f64) {
        self.lock().zoom = zoom;
        self.emit(MapEvent::ZoomChanged);
    }

    pub fn click(&self, marker: MarkerId) {
        self.emit(MapEvent::MarkerClicked(marker));
    }

    pub fn marker(&self, marker: MarkerId) -> Option<HeadlessMarker> {
        self.lock().markers.get(&marker).cloned()
    }

    pub fn markers(&self) -> Vec<(MarkerId, HeadlessMarker)> {
        self.lock()
            .markers
            .iter()
            .map(|(id, m)| (*id, m.clone()))
            .collect()
    }

    pub fn is_live(&self, marker: MarkerId) -> bool {
        self.lock().markers.contains_key(&marker)
    }

    pub fn live_marker_count(&self) -> usize {
        self.lock().markers.len()
    }

    pub fn created_total(&self) -> usize {
        self.lock().created_total
    }

    pub fn attached_count(&self) -> usize {
        self.lock().markers.values().filter(|m| m.attached).count()
    }

    /// Attach plus detach calls received so far.
    pub fn visibility_call_count(&self) -> usize {
        self.lock().visibility_calls
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn viewport_commands(&self) -> Vec<ViewportCommand> {
        self.lock().viewport_commands.clone()
    }
}

impl MapSurface for HeadlessSurface {
    fn load_marker_library(&self) -> BoxFuture<'_, Result<(), SurfaceError>> {
        let failure = self.lock().library_failure.clone();
        Box::pin(async move {
            match failure {
                Some(reason) => Err(SurfaceError::MarkerLibrary(reason)),
                None => Ok(()),
            }
        })
    }

    fn create_marker(&self, position: LatLng, content: &MarkerContent, title: &str) -> MarkerId {
        let mut inner = self.lock();
        inner.next_marker += 1;
        inner.created_total += 1;
        let id = MarkerId(inner.next_marker);
        inner.markers.insert(
            id,
            HeadlessMarker {
                position,
                content: content.clone(),
                title: title.to_string(),
                attached: false,
            },
        );
        id
    }

    fn attach_marker(&self, marker: MarkerId) {
        let mut inner = self.lock();
        inner.visibility_calls += 1;
        if let Some(m) = inner.markers.get_mut(&marker) {
            m.attached = true;
        }
    }

    fn detach_marker(&self, marker: MarkerId) {
        let mut inner = self.lock();
        inner.visibility_calls += 1;
        if let Some(m) = inner.markers.get_mut(&marker) {
            m.attached = false;
        }
    }

    fn remove_marker(&self, marker: MarkerId) {
        self.lock().markers.remove(&marker);
    }

    fn add_listener(&self, kind: MapEventKind, sink: UnboundedSender<MapEvent>) -> ListenerId {
        let mut inner = self.lock();
        inner.next_listener += 1;
        let id = ListenerId(inner.next_listener);
        inner.listeners.insert(id, (kind, sink));
        id
    }

    fn remove_listener(&self, listener: ListenerId) {
        self.lock().listeners.remove(&listener);
    }

    fn zoom(&self) -> f64 {
        self.lock().zoom
    }

    fn set_zoom(&self, zoom: f64) {
        let mut inner = self.lock();
        inner.zoom = zoom;
        inner.viewport_commands.push(ViewportCommand::SetZoom(zoom));
    }

    fn pan_to(&self, position: LatLng) {
        self.lock()
            .viewport_commands
            .push(ViewportCommand::PanTo(position));
    }

    fn fit_bounds(&self, bounds: Bounds, padding_px: u32) {
        self.lock()
            .viewport_commands
            .push(ViewportCommand::FitBounds { bounds, padding_px });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgb::RGB8;
    use tokio::sync::mpsc;

    fn content() -> MarkerContent {
        MarkerContent::Individual {
            colour: RGB8::new(1, 2, 3),
            diameter_px: 28,
            initials: "AB".to_string(),
        }
    }

    #[test]
    fn test_marker_lifecycle() {
        let surface = HeadlessSurface::new(5.0);
        let id = surface.create_marker(LatLng::new(1.0, 2.0), &content(), "Ab");
        assert!(!surface.marker(id).unwrap().attached);

        surface.attach_marker(id);
        assert_eq!(surface.attached_count(), 1);
        surface.detach_marker(id);
        surface.remove_marker(id);

        assert!(!surface.is_live(id));
        assert_eq!(surface.visibility_call_count(), 2);
        assert_eq!(surface.created_total(), 1);
    }

    #[test]
    fn test_listeners_filter_by_kind() {
        let surface = HeadlessSurface::new(5.0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = surface.add_listener(MapEventKind::ZoomChanged, tx);

        surface.click(MarkerId(1));
        surface.user_zoom(7.0);
        assert_eq!(rx.try_recv().ok(), Some(MapEvent::ZoomChanged));
        assert!(rx.try_recv().is_err());
        assert_eq!(surface.zoom(), 7.0);

        surface.remove_listener(listener);
        surface.user_zoom(8.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_library() {
        let surface = HeadlessSurface::failing("offline");
        assert!(surface.load_marker_library().await.is_err());
        assert!(HeadlessSurface::new(1.0).load_marker_library().await.is_ok());
    }
}
