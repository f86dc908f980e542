// Copyright Catenary Transit Initiatives
// Marker styling and the lifecycle of every marker handle the engine creates

use crate::cluster::{ClusterBuild, ClusterRecord, GeocodedContact};
use crate::geometry::Bounds;
use crate::lod::GroupVisibility;
use crate::surface::{MapSurface, MarkerId};
use ahash::AHashMap;
use rgb::RGB8;
use serde::Serialize;
use std::sync::Arc;

pub const MIN_BUBBLE_DIAMETER_PX: u32 = 40;
pub const MAX_BUBBLE_DIAMETER_PX: u32 = 80;
pub const BUBBLE_PX_PER_MEMBER: u32 = 8;
pub const INDIVIDUAL_DIAMETER_PX: u32 = 28;
pub const UNGROUPED_COLOUR: RGB8 = RGB8::new(107, 114, 128);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BorderStyle {
    Solid,
    /// Wide group, clicking shows a notice before zooming.
    Dashed,
    /// Position was moved off the true centroid.
    Dotted,
}

impl BorderStyle {
    pub fn for_record(is_wide: bool, is_position_adjusted: bool) -> Self {
        if is_wide {
            BorderStyle::Dashed
        } else if is_position_adjusted {
            BorderStyle::Dotted
        } else {
            BorderStyle::Solid
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum MarkerContent {
    Aggregate {
        colour: RGB8,
        diameter_px: u32,
        border: BorderStyle,
        label: String,
    },
    Individual {
        colour: RGB8,
        diameter_px: u32,
        initials: String,
    },
}

pub fn bubble_diameter_px(member_count: usize) -> u32 {
    let scaled = u32::try_from(member_count)
        .unwrap_or(u32::MAX)
        .saturating_mul(BUBBLE_PX_PER_MEMBER);
    scaled.clamp(MIN_BUBBLE_DIAMETER_PX, MAX_BUBBLE_DIAMETER_PX)
}

pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();

    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

impl MarkerContent {
    pub fn aggregate(record: &ClusterRecord) -> Self {
        MarkerContent::Aggregate {
            colour: record.color,
            diameter_px: bubble_diameter_px(record.member_count),
            border: BorderStyle::for_record(record.is_wide, record.is_position_adjusted),
            label: record.member_count.to_string(),
        }
    }

    pub fn individual(contact: &GeocodedContact, colour: RGB8) -> Self {
        MarkerContent::Individual {
            colour,
            diameter_px: INDIVIDUAL_DIAMETER_PX,
            initials: initials(&contact.name),
        }
    }
}

fn aggregate_title(record: &ClusterRecord) -> String {
    if record.is_wide {
        format!(
            "{} ({} contacts, spans {:.0} km)",
            record.group.name, record.member_count, record.max_pairwise_distance_km
        )
    } else {
        format!("{} ({} contacts)", record.group.name, record.member_count)
    }
}

fn individual_title(contact: &GeocodedContact) -> String {
    match &contact.company {
        Some(company) if !company.is_empty() => format!("{} - {}", contact.name, company),
        _ => contact.name.clone(),
    }
}

/// Shown by the host before zooming onto a wide group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WideGroupNotice {
    pub group_id: String,
    pub group_name: String,
    pub max_pairwise_distance_km: f64,
}

/// What a marker represents, enough to route its clicks without the record.
#[derive(Clone, Debug)]
pub enum MarkerTarget {
    Aggregate {
        group_id: String,
        bounds: Bounds,
        wide_notice: Option<WideGroupNotice>,
    },
    Individual {
        group_id: Option<String>,
        contact: GeocodedContact,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClickAction {
    /// Zoom onto the group. A notice means the fit must wait until the notice was shown.
    FitGroup {
        group_id: String,
        bounds: Bounds,
        wide_notice: Option<WideGroupNotice>,
    },
    ContactClicked(GeocodedContact),
}

#[derive(Debug)]
struct TrackedMarker {
    id: MarkerId,
    attached: bool,
}

impl TrackedMarker {
    fn attach(&mut self, surface: &dyn MapSurface) -> bool {
        if self.attached {
            return false;
        }
        tracing::trace!("Attaching marker {:?}", self.id);
        surface.attach_marker(self.id);
        self.attached = true;
        true
    }

    fn detach(&mut self, surface: &dyn MapSurface) -> bool {
        if !self.attached {
            return false;
        }
        tracing::trace!("Detaching marker {:?}", self.id);
        surface.detach_marker(self.id);
        self.attached = false;
        true
    }

    fn set_attached(&mut self, surface: &dyn MapSurface, attached: bool) -> bool {
        if attached {
            self.attach(surface)
        } else {
            self.detach(surface)
        }
    }
}

#[derive(Debug)]
struct GroupMarkers {
    aggregate: TrackedMarker,
    individuals: Vec<TrackedMarker>,
}

/// Owns every marker handle of the current build.
///
/// Handles are created detached and only change state through [`MarkerLifecycle::apply_group`]
/// and [`MarkerLifecycle::set_ungrouped_visible`]. Both only call the surface for handles whose
/// state actually changes.
pub struct MarkerLifecycle {
    surface: Arc<dyn MapSurface>,
    groups: AHashMap<String, GroupMarkers>,
    ungrouped: Vec<TrackedMarker>,
    targets: AHashMap<MarkerId, MarkerTarget>,
}

impl MarkerLifecycle {
    pub fn new(surface: Arc<dyn MapSurface>) -> Self {
        Self {
            surface,
            groups: AHashMap::new(),
            ungrouped: Vec::new(),
            targets: AHashMap::new(),
        }
    }

    /// Creates all handles for `build`, replacing whatever the previous build left.
    pub fn build(&mut self, build: &ClusterBuild) {
        self.cleanup();

        for record in &build.records {
            let aggregate_id = self.surface.create_marker(
                record.adjusted_position,
                &MarkerContent::aggregate(record),
                &aggregate_title(record),
            );
            self.targets.insert(
                aggregate_id,
                MarkerTarget::Aggregate {
                    group_id: record.group.id.clone(),
                    bounds: record.bounding_box,
                    wide_notice: record.is_wide.then(|| WideGroupNotice {
                        group_id: record.group.id.clone(),
                        group_name: record.group.name.clone(),
                        max_pairwise_distance_km: record.max_pairwise_distance_km,
                    }),
                },
            );

            let individuals = record
                .members
                .iter()
                .map(|member| {
                    let id = self.create_individual(member, record.color);
                    self.targets.insert(
                        id,
                        MarkerTarget::Individual {
                            group_id: Some(record.group.id.clone()),
                            contact: member.clone(),
                        },
                    );
                    TrackedMarker {
                        id,
                        attached: false,
                    }
                })
                .collect();

            self.groups.insert(
                record.group.id.clone(),
                GroupMarkers {
                    aggregate: TrackedMarker {
                        id: aggregate_id,
                        attached: false,
                    },
                    individuals,
                },
            );
        }

        for contact in &build.ungrouped {
            let id = self.create_individual(contact, UNGROUPED_COLOUR);
            self.targets.insert(
                id,
                MarkerTarget::Individual {
                    group_id: None,
                    contact: contact.clone(),
                },
            );
            self.ungrouped.push(TrackedMarker {
                id,
                attached: false,
            });
        }

        tracing::info!(
            "Created {} marker handles for {} groups",
            self.targets.len(),
            self.groups.len()
        );
    }

    fn create_individual(&self, contact: &GeocodedContact, colour: RGB8) -> MarkerId {
        self.surface.create_marker(
            contact.location,
            &MarkerContent::individual(contact, colour),
            &individual_title(contact),
        )
    }

    /// Brings one group's handles in line with `visibility`. Returns the number of surface calls made.
    pub fn apply_group(&mut self, group_id: &str, visibility: GroupVisibility) -> usize {
        let surface = self.surface.as_ref();
        let Some(markers) = self.groups.get_mut(group_id) else {
            return 0;
        };

        let mut changes = 0;
        // detach first so the two never overlap on the surface
        if !visibility.aggregate_visible && markers.aggregate.detach(surface) {
            changes += 1;
        }
        for marker in &mut markers.individuals {
            if !visibility.individuals_visible && marker.detach(surface) {
                changes += 1;
            }
        }
        if visibility.aggregate_visible && markers.aggregate.attach(surface) {
            changes += 1;
        }
        for marker in &mut markers.individuals {
            if visibility.individuals_visible && marker.attach(surface) {
                changes += 1;
            }
        }
        changes
    }

    pub fn set_ungrouped_visible(&mut self, visible: bool) -> usize {
        let surface = self.surface.as_ref();
        let mut changes = 0;
        for marker in &mut self.ungrouped {
            if marker.set_attached(surface, visible) {
                changes += 1;
            }
        }
        changes
    }

    pub fn route_click(&self, marker: MarkerId) -> Option<ClickAction> {
        match self.targets.get(&marker)? {
            MarkerTarget::Aggregate {
                group_id,
                bounds,
                wide_notice,
            } => Some(ClickAction::FitGroup {
                group_id: group_id.clone(),
                bounds: *bounds,
                wide_notice: wide_notice.clone(),
            }),
            MarkerTarget::Individual { contact, .. } => {
                Some(ClickAction::ContactClicked(contact.clone()))
            }
        }
    }

    pub fn target(&self, marker: MarkerId) -> Option<&MarkerTarget> {
        self.targets.get(&marker)
    }

    pub fn attached_aggregates(&self) -> usize {
        self.groups.values().filter(|g| g.aggregate.attached).count()
    }

    pub fn attached_individuals(&self) -> usize {
        self.groups
            .values()
            .flat_map(|g| g.individuals.iter())
            .chain(self.ungrouped.iter())
            .filter(|m| m.attached)
            .count()
    }

    pub fn group_visibility(&self, group_id: &str) -> Option<GroupVisibility> {
        self.groups.get(group_id).map(|g| GroupVisibility {
            aggregate_visible: g.aggregate.attached,
            individuals_visible: g.individuals.iter().any(|m| m.attached),
        })
    }

    pub fn ungrouped_visible(&self) -> bool {
        self.ungrouped.iter().any(|m| m.attached)
    }

    pub fn aggregate_marker(&self, group_id: &str) -> Option<MarkerId> {
        self.groups.get(group_id).map(|g| g.aggregate.id)
    }

    pub fn individual_markers(&self, group_id: &str) -> Vec<MarkerId> {
        self.groups
            .get(group_id)
            .map(|g| g.individuals.iter().map(|m| m.id).collect())
            .unwrap_or_default()
    }

    pub fn ungrouped_markers(&self) -> Vec<MarkerId> {
        self.ungrouped.iter().map(|m| m.id).collect()
    }

    pub fn handle_count(&self) -> usize {
        self.targets.len()
    }

    pub fn marker_ids(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.targets.keys().copied()
    }

    /// Detaches and releases every handle.
    pub fn cleanup(&mut self) {
        if self.targets.is_empty() {
            return;
        }

        let surface = self.surface.as_ref();
        for markers in self.groups.values_mut() {
            markers.aggregate.detach(surface);
            for marker in &mut markers.individuals {
                marker.detach(surface);
            }
        }
        for marker in &mut self.ungrouped {
            marker.detach(surface);
        }
        for id in self.targets.keys() {
            surface.remove_marker(*id);
        }

        tracing::debug!("Released {} marker handles", self.targets.len());

        self.groups.clear();
        self.ungrouped.clear();
        self.targets.clear();
    }
}

impl Drop for MarkerLifecycle {
    fn drop(&mut self) {
        self.cleanup();
    }
}
