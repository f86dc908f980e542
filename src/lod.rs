// Copyright Catenary Transit Initiatives
// Zoom-driven level of detail: aggregate bubbles, individual markers, or a mix

use crate::cluster::ClusterRecord;
use crate::config::ZoomThresholds;
use crate::marker::MarkerLifecycle;
use ahash::AHashMap;
use serde::Serialize;

/// In mixed mode, groups at least this large keep their aggregate bubble.
pub const MIXED_MODE_MIN_AGGREGATE_MEMBERS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LodMode {
    Clustered,
    Mixed,
    Individual,
}

pub fn select_mode(zoom: f64, thresholds: &ZoomThresholds) -> LodMode {
    if zoom >= thresholds.individual_markers {
        LodMode::Individual
    } else if zoom < thresholds.group_clusters {
        LodMode::Clustered
    } else {
        LodMode::Mixed
    }
}

/// At most one of the two is ever true.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupVisibility {
    pub aggregate_visible: bool,
    pub individuals_visible: bool,
}

impl GroupVisibility {
    pub const AGGREGATE: Self = Self {
        aggregate_visible: true,
        individuals_visible: false,
    };
    pub const INDIVIDUALS: Self = Self {
        aggregate_visible: false,
        individuals_visible: true,
    };
}

pub fn group_visibility(mode: LodMode, member_count: usize) -> GroupVisibility {
    match mode {
        LodMode::Clustered => GroupVisibility::AGGREGATE,
        LodMode::Individual => GroupVisibility::INDIVIDUALS,
        LodMode::Mixed if member_count >= MIXED_MODE_MIN_AGGREGATE_MEMBERS => {
            GroupVisibility::AGGREGATE
        }
        LodMode::Mixed => GroupVisibility::INDIVIDUALS,
    }
}

/// What should be on the map, per group plus the ungrouped bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityState {
    pub groups: AHashMap<String, GroupVisibility>,
    /// Ungrouped markers ignore zoom and are shown whenever any exist.
    pub ungrouped_visible: bool,
}

pub fn plan_visibility(
    mode: LodMode,
    records: &[ClusterRecord],
    has_ungrouped: bool,
) -> VisibilityState {
    VisibilityState {
        groups: records
            .iter()
            .map(|r| (r.group.id.clone(), group_visibility(mode, r.member_count)))
            .collect(),
        ungrouped_visible: has_ungrouped,
    }
}

#[derive(Debug)]
pub struct LodController {
    thresholds: ZoomThresholds,
    hysteresis: f64,
    last_zoom: Option<f64>,
    mode: Option<LodMode>,
    state: VisibilityState,
}

impl LodController {
    pub fn new(thresholds: ZoomThresholds, hysteresis: f64) -> Self {
        Self {
            thresholds,
            hysteresis,
            last_zoom: None,
            mode: None,
            state: VisibilityState::default(),
        }
    }

    /// True on the first call after a reset, then only once zoom has moved past the hysteresis band.
    pub fn should_recompute(&self, zoom: f64) -> bool {
        match self.last_zoom {
            None => true,
            Some(last) => (zoom - last).abs() > self.hysteresis,
        }
    }

    /// Recomputes only if the zoom moved far enough. Returns the number of surface calls made.
    pub fn on_zoom(
        &mut self,
        zoom: f64,
        records: &[ClusterRecord],
        has_ungrouped: bool,
        markers: &mut MarkerLifecycle,
    ) -> Option<usize> {
        if !self.should_recompute(zoom) {
            return None;
        }
        Some(self.recompute(zoom, records, has_ungrouped, markers))
    }

    /// Unconditionally brings markers in line with `zoom`, flipping only groups whose
    /// visibility differs from the previous state.
    pub fn recompute(
        &mut self,
        zoom: f64,
        records: &[ClusterRecord],
        has_ungrouped: bool,
        markers: &mut MarkerLifecycle,
    ) -> usize {
        let mode = select_mode(zoom, &self.thresholds);
        let next = plan_visibility(mode, records, has_ungrouped);

        let mut changes = 0;
        for record in records {
            let group_id = record.group.id.as_str();
            let wanted = next.groups.get(group_id).copied().unwrap_or_default();
            let previous = self.state.groups.get(group_id).copied().unwrap_or_default();
            if wanted != previous {
                changes += markers.apply_group(group_id, wanted);
            }
        }
        if next.ungrouped_visible != self.state.ungrouped_visible {
            changes += markers.set_ungrouped_visible(next.ungrouped_visible);
        }

        if self.mode != Some(mode) {
            tracing::debug!("LOD mode {:?} -> {:?} at zoom {}", self.mode, mode, zoom);
        }

        self.last_zoom = Some(zoom);
        self.mode = Some(mode);
        self.state = next;
        changes
    }

    /// Forget everything, used when the handles it tracked were discarded.
    pub fn reset(&mut self) {
        self.last_zoom = None;
        self.mode = None;
        self.state = VisibilityState::default();
    }

    pub fn mode(&self) -> Option<LodMode> {
        self.mode
    }

    pub fn last_zoom(&self) -> Option<f64> {
        self.last_zoom
    }

    pub fn state(&self) -> &VisibilityState {
        &self.state
    }

    pub fn thresholds(&self) -> &ZoomThresholds {
        &self.thresholds
    }
}
