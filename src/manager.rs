// Copyright Catenary Transit Initiatives
// Public entry point: wires clustering, markers and LOD to a map surface

use crate::cluster::{ClusterBuild, ClusterRecord, Contact, GeocodedContact, Group, build_clusters};
use crate::config::ClusterOptions;
use crate::error::ClusterError;
use crate::lod::{LodController, LodMode};
use crate::marker::{ClickAction, MarkerLifecycle, WideGroupNotice};
use crate::surface::{ListenerId, MapEvent, MapEventKind, MapSurface, MarkerId};
use ahash::AHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub type ContactClickHandler = Box<dyn FnMut(&GeocodedContact) + Send>;
pub type WideGroupNoticeHandler = Box<dyn FnMut(&WideGroupNotice) + Send>;

const SUBSCRIBED_EVENTS: [MapEventKind; 3] = [
    MapEventKind::ZoomChanged,
    MapEventKind::Idle,
    MapEventKind::MarkerClicked,
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterState {
    pub current_zoom: f64,
    pub mode: Option<LodMode>,
    /// Aggregate markers currently attached.
    pub group_markers_visible: usize,
    /// Individual markers currently attached, grouped and ungrouped.
    pub individual_markers_visible: usize,
    pub wide_groups_count: usize,
    pub cluster_count: usize,
    pub ungrouped_count: usize,
}

/// Owns every cluster record and marker handle for one map.
///
/// Each `initialize()`/`update_data()` is a full rebuild: previous handles are released,
/// records are rebuilt, handles are created detached and the first LOD pass attaches
/// what the current zoom calls for. Deferred viewport actions are tagged with the build
/// generation and do nothing once a newer build or `cleanup()` happened.
pub struct ClusterManager {
    surface: Arc<dyn MapSurface>,
    options: ClusterOptions,
    groups: Vec<Group>,
    contacts: Vec<Contact>,
    build: ClusterBuild,
    record_index: AHashMap<String, usize>,
    markers: MarkerLifecycle,
    lod: LodController,
    listeners: Vec<ListenerId>,
    events_tx: UnboundedSender<MapEvent>,
    events_rx: UnboundedReceiver<MapEvent>,
    deferred: Vec<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
    is_initialized: bool,
    contact_click_handler: Option<ContactClickHandler>,
    wide_group_notice_handler: Option<WideGroupNoticeHandler>,
}

impl ClusterManager {
    pub fn new(
        surface: Arc<dyn MapSurface>,
        groups: Vec<Group>,
        contacts: Vec<Contact>,
        options: ClusterOptions,
    ) -> Result<Self, ClusterError> {
        options.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            markers: MarkerLifecycle::new(Arc::clone(&surface)),
            lod: LodController::new(options.zoom_thresholds, options.zoom_hysteresis),
            surface,
            options,
            groups,
            contacts,
            build: ClusterBuild::default(),
            record_index: AHashMap::new(),
            listeners: Vec::new(),
            events_tx,
            events_rx,
            deferred: Vec::new(),
            generation: Arc::new(AtomicU64::new(0)),
            is_initialized: false,
            contact_click_handler: None,
            wide_group_notice_handler: None,
        })
    }

    /// Waits for the marker library, then builds and shows the clusters.
    ///
    /// A library failure leaves the manager uninitialized. Calling this again once
    /// initialized is logged and ignored.
    pub async fn initialize(&mut self) -> Result<(), ClusterError> {
        if self.is_initialized {
            tracing::warn!("Cluster manager already initialized, ignoring initialize()");
            return Ok(());
        }

        self.surface
            .load_marker_library()
            .await
            .map_err(ClusterError::MarkerLibraryUnavailable)?;

        self.subscribe();
        self.rebuild();
        self.is_initialized = true;

        tracing::info!(
            "Cluster manager initialized with {} clusters",
            self.build.records.len()
        );
        Ok(())
    }

    /// Replaces the groups and contacts wholesale. Before `initialize()` this only stores them.
    pub fn update_data(&mut self, groups: Vec<Group>, contacts: Vec<Contact>) {
        self.groups = groups;
        self.contacts = contacts;

        if self.is_initialized {
            self.rebuild();
        }
    }

    /// Releases every handle, cancels deferred actions and unsubscribes from the surface.
    pub fn cleanup(&mut self) {
        self.cancel_deferred();
        self.markers.cleanup();
        self.lod.reset();
        self.build = ClusterBuild::default();
        self.record_index.clear();

        for listener in self.listeners.drain(..) {
            self.surface.remove_listener(listener);
        }
        while self.events_rx.try_recv().is_ok() {}

        self.is_initialized = false;
    }

    pub fn set_contact_click_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&GeocodedContact) + Send + 'static,
    {
        self.contact_click_handler = Some(Box::new(handler));
    }

    pub fn set_wide_group_notice_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&WideGroupNotice) + Send + 'static,
    {
        self.wide_group_notice_handler = Some(Box::new(handler));
    }

    pub fn get_state(&self) -> ClusterState {
        ClusterState {
            current_zoom: self.surface.zoom(),
            mode: self.lod.mode(),
            group_markers_visible: self.markers.attached_aggregates(),
            individual_markers_visible: self.markers.attached_individuals(),
            wide_groups_count: self.build.wide_groups_count(),
            cluster_count: self.build.records.len(),
            ungrouped_count: self.build.ungrouped.len(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn clusters(&self) -> &[ClusterRecord] {
        &self.build.records
    }

    pub fn cluster(&self, group_id: &str) -> Option<&ClusterRecord> {
        self.record_index
            .get(group_id)
            .and_then(|i| self.build.records.get(*i))
    }

    pub fn ungrouped(&self) -> &[GeocodedContact] {
        &self.build.ungrouped
    }

    pub fn markers(&self) -> &MarkerLifecycle {
        &self.markers
    }

    /// Fits the viewport to one cluster. Returns false for unknown groups.
    pub fn focus_group(&self, group_id: &str) -> bool {
        match self.cluster(group_id).map(|r| r.bounding_box) {
            Some(bounds) => {
                self.surface
                    .fit_bounds(bounds, self.options.fit_bounds_padding_px);
                true
            }
            None => false,
        }
    }

    pub fn handle_event(&mut self, event: MapEvent) {
        if !self.is_initialized {
            return;
        }

        match event {
            MapEvent::ZoomChanged | MapEvent::Idle => {
                let zoom = self.surface.zoom();
                let has_ungrouped = !self.build.ungrouped.is_empty();
                if let Some(changes) =
                    self.lod
                        .on_zoom(zoom, &self.build.records, has_ungrouped, &mut self.markers)
                {
                    tracing::debug!("LOD recomputed at zoom {} with {} marker changes", zoom, changes);
                }
            }
            MapEvent::MarkerClicked(marker) => self.on_marker_click(marker),
        }
    }

    /// Handles every event already queued by the surface. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next surface event and handles it, for hosts driving the manager from a task.
    pub async fn process_next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    fn subscribe(&mut self) {
        for kind in SUBSCRIBED_EVENTS {
            let listener = self.surface.add_listener(kind, self.events_tx.clone());
            self.listeners.push(listener);
        }
    }

    fn rebuild(&mut self) {
        self.cancel_deferred();
        self.markers.cleanup();
        self.lod.reset();

        self.build = build_clusters(&self.groups, &self.contacts, &self.options);
        self.record_index = self
            .build
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.group.id.clone(), i))
            .collect();

        self.markers.build(&self.build);

        let zoom = self.surface.zoom();
        let has_ungrouped = !self.build.ungrouped.is_empty();
        self.lod
            .recompute(zoom, &self.build.records, has_ungrouped, &mut self.markers);

        if self.options.auto_center {
            if let Some(bounds) = self.build.overall_bounds() {
                let padding = self.options.fit_bounds_padding_px;
                self.defer(self.options.auto_center_delay(), move |surface| {
                    if bounds.is_single_point() {
                        surface.pan_to(bounds.center());
                    } else {
                        surface.fit_bounds(bounds, padding);
                    }
                });
            }
        }
    }

    fn on_marker_click(&mut self, marker: MarkerId) {
        match self.markers.route_click(marker) {
            None => tracing::debug!("Ignoring click on unknown marker {:?}", marker),
            Some(ClickAction::ContactClicked(contact)) => {
                if let Some(handler) = self.contact_click_handler.as_mut() {
                    handler(&contact);
                }
            }
            Some(ClickAction::FitGroup {
                group_id,
                bounds,
                wide_notice,
            }) => {
                let padding = self.options.fit_bounds_padding_px;
                match wide_notice {
                    Some(notice) => {
                        tracing::info!(
                            "Group {} spans {:.0} km, delaying zoom",
                            group_id,
                            notice.max_pairwise_distance_km
                        );
                        if let Some(handler) = self.wide_group_notice_handler.as_mut() {
                            handler(&notice);
                        }
                        self.defer(self.options.wide_group_fit_delay(), move |surface| {
                            surface.fit_bounds(bounds, padding)
                        });
                    }
                    None => self.surface.fit_bounds(bounds, padding),
                }
            }
        }
    }

    /// Runs `action` after `delay` unless the build it was scheduled under is gone by then.
    fn defer<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce(&dyn MapSurface) + Send + 'static,
    {
        self.deferred.retain(|task| !task.is_finished());

        let surface = Arc::clone(&self.surface);
        let generation = Arc::clone(&self.generation);
        let scheduled_under = generation.load(Ordering::SeqCst);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.deferred.push(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if generation.load(Ordering::SeqCst) == scheduled_under {
                        action(surface.as_ref());
                    }
                }));
            }
            Err(_) => {
                tracing::warn!("No tokio runtime available, running deferred map action now");
                action(surface.as_ref());
            }
        }
    }

    fn cancel_deferred(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for task in self.deferred.drain(..) {
            task.abort();
        }
    }

    #[cfg(test)]
    fn pending_deferred(&self) -> usize {
        self.deferred.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for ClusterManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Bounds, LatLng};
    use crate::headless::{HeadlessSurface, ViewportCommand};
    use std::sync::Mutex;

    fn contact(id: &str, lat: f64, lng: f64) -> Contact {
        Contact {
            id: id.to_string(),
            name: format!("Contact {}", id),
            company: None,
            location: Some(LatLng::new(lat, lng)),
        }
    }

    fn group(id: &str, name: &str, members: &[&str]) -> Group {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            group_type: "auto".to_string(),
            contact_ids: members.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn quiet_options() -> ClusterOptions {
        ClusterOptions {
            auto_center: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_uninitialized() {
        let surface = Arc::new(HeadlessSurface::failing("script blocked"));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a"])],
            vec![contact("a", 1.0, 1.0)],
            quiet_options(),
        )
        .unwrap();

        let result = manager.initialize().await;
        assert!(matches!(result, Err(ClusterError::MarkerLibraryUnavailable(_))));
        assert!(!manager.is_initialized());
        assert_eq!(surface.created_total(), 0);
        assert_eq!(surface.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_second_initialize_is_ignored() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a"])],
            vec![contact("a", 1.0, 1.0)],
            quiet_options(),
        )
        .unwrap();

        manager.initialize().await.unwrap();
        let created = surface.created_total();
        manager.initialize().await.unwrap();

        assert_eq!(surface.created_total(), created);
        assert_eq!(surface.listener_count(), SUBSCRIBED_EVENTS.len());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut options = quiet_options();
        options.zoom_hysteresis = f64::NAN;
        assert!(ClusterManager::new(surface, Vec::new(), Vec::new(), options).is_err());
    }

    #[tokio::test]
    async fn test_update_before_initialize_only_stores() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager =
            ClusterManager::new(surface.clone(), Vec::new(), Vec::new(), quiet_options()).unwrap();

        manager.update_data(vec![group("g", "G", &["a"])], vec![contact("a", 1.0, 1.0)]);
        assert_eq!(surface.created_total(), 0);

        manager.initialize().await.unwrap();
        assert_eq!(manager.clusters().len(), 1);
        assert!(manager.cluster("g").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_center_fires_once_after_delay() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a", "b"])],
            vec![contact("a", 1.0, 1.0), contact("b", 2.0, 3.0)],
            ClusterOptions::default(),
        )
        .unwrap();

        manager.initialize().await.unwrap();
        assert!(surface.viewport_commands().is_empty());

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(
            surface.viewport_commands(),
            vec![ViewportCommand::FitBounds {
                bounds: Bounds {
                    south_west: LatLng::new(1.0, 1.0),
                    north_east: LatLng::new(2.0, 3.0),
                },
                padding_px: 50,
            }]
        );
        assert_eq!(manager.pending_deferred(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_center_single_point_pans() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            Vec::new(),
            vec![contact("a", 10.0, 20.0)],
            ClusterOptions::default(),
        )
        .unwrap();

        manager.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            surface.viewport_commands(),
            vec![ViewportCommand::PanTo(LatLng::new(10.0, 20.0))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_auto_center() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a", "b"])],
            vec![contact("a", 1.0, 1.0), contact("b", 2.0, 3.0)],
            ClusterOptions::default(),
        )
        .unwrap();

        manager.initialize().await.unwrap();
        manager.cleanup();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(surface.viewport_commands().is_empty());
        assert_eq!(surface.live_marker_count(), 0);
        assert_eq!(surface.listener_count(), 0);
        assert!(!manager.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_supersedes_pending_auto_center() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            Vec::new(),
            vec![contact("a", 1.0, 1.0)],
            ClusterOptions::default(),
        )
        .unwrap();

        manager.initialize().await.unwrap();
        manager.update_data(Vec::new(), vec![contact("b", 7.0, 8.0)]);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            surface.viewport_commands(),
            vec![ViewportCommand::PanTo(LatLng::new(7.0, 8.0))]
        );
    }

    #[tokio::test]
    async fn test_contact_click_handler() {
        let surface = Arc::new(HeadlessSurface::new(16.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a"])],
            vec![contact("a", 1.0, 1.0)],
            quiet_options(),
        )
        .unwrap();

        let clicked = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&clicked);
        manager.set_contact_click_handler(move |c| sink.lock().unwrap().push(c.id.clone()));
        manager.initialize().await.unwrap();

        let marker = manager.markers().individual_markers("g")[0];
        surface.click(marker);
        assert_eq!(manager.process_pending_events(), 1);

        assert_eq!(*clicked.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(manager.get_state().individual_markers_visible, 1);
    }

    #[tokio::test]
    async fn test_focus_group() {
        let surface = Arc::new(HeadlessSurface::new(5.0));
        let mut manager = ClusterManager::new(
            surface.clone(),
            vec![group("g", "G", &["a", "b"])],
            vec![contact("a", 1.0, 1.0), contact("b", 2.0, 2.0)],
            quiet_options(),
        )
        .unwrap();
        manager.initialize().await.unwrap();

        assert!(manager.focus_group("g"));
        assert!(!manager.focus_group("nope"));
        assert_eq!(
            surface.viewport_commands(),
            vec![ViewportCommand::FitBounds {
                bounds: manager.cluster("g").unwrap().bounding_box,
                padding_px: 50,
            }]
        );
    }
}
