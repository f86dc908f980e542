// Copyright Catenary Transit Initiatives
// Builds one immutable cluster record per group from the caller's contacts

use crate::config::ClusterOptions;
use crate::geometry::{self, Bounds, LatLng};
use crate::spiderfy::CollisionResolver;
use crate::wide_group;
use ahash::{AHashMap, AHashSet};
use rgb::RGB8;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<LatLng>,
}

impl Contact {
    /// Borrow as a geocoded contact if the location is present and valid.
    pub fn geocoded(&self) -> Option<GeocodedContact> {
        match self.location {
            Some(location) if location.is_valid() => Some(GeocodedContact {
                id: self.id.clone(),
                name: self.name.clone(),
                company: self.company.clone(),
                location,
            }),
            _ => None,
        }
    }
}

/// A contact with a usable position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeocodedContact {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub location: LatLng,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    /// Free-form tag such as `auto`, `event` or `company`.
    #[serde(rename = "type", default)]
    pub group_type: String,
    #[serde(default)]
    pub contact_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClusterRecord {
    pub group: Group,
    pub members: Vec<GeocodedContact>,
    pub centroid: LatLng,
    pub adjusted_position: LatLng,
    pub is_position_adjusted: bool,
    pub bounding_box: Bounds,
    /// Advisory only, bubble size comes from `member_count`.
    pub radius: f64,
    pub color: RGB8,
    pub member_count: usize,
    pub max_pairwise_distance_km: f64,
    pub is_wide: bool,
}

impl ClusterRecord {
    pub fn group_id(&self) -> &str {
        &self.group.id
    }

    pub fn member_positions(&self) -> Vec<LatLng> {
        self.members.iter().map(|m| m.location).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClusterBuild {
    /// In group input order.
    pub records: Vec<ClusterRecord>,
    pub ungrouped: Vec<GeocodedContact>,
}

impl ClusterBuild {
    pub fn wide_groups_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_wide).count()
    }

    /// Bounds over every geocoded contact in the build, grouped or not.
    pub fn overall_bounds(&self) -> Option<Bounds> {
        let mut positions = self
            .records
            .iter()
            .flat_map(|r| r.members.iter())
            .chain(self.ungrouped.iter())
            .map(|c| c.location);

        let mut bounds = Bounds::from_point(positions.next()?);
        for p in positions {
            bounds.extend(p);
        }
        Some(bounds)
    }
}

/// Runs geometry, the wide-group test and collision resolution over each group in order.
///
/// Groups with no geocoded member are dropped. Colours come from the group's position in
/// `groups`, so a dropped group still consumes its palette slot.
pub fn build_clusters(
    groups: &[Group],
    contacts: &[Contact],
    options: &ClusterOptions,
) -> ClusterBuild {
    let geocoded: AHashMap<&str, GeocodedContact> = contacts
        .iter()
        .filter_map(|c| c.geocoded().map(|g| (c.id.as_str(), g)))
        .collect();

    let mut resolver = CollisionResolver::new(options.collision_offset);
    let mut records = Vec::with_capacity(groups.len());
    let mut grouped_ids: AHashSet<String> = AHashSet::new();

    for (index, group) in groups.iter().enumerate() {
        let mut seen: AHashSet<&str> = AHashSet::new();
        let members: Vec<GeocodedContact> = group
            .contact_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| geocoded.get(id.as_str()).cloned())
            .collect();

        if members.is_empty() {
            tracing::debug!("Skipping group {} with no geocoded members", group.id);
            continue;
        }

        let points: Vec<LatLng> = members.iter().map(|m| m.location).collect();

        let (Some(centroid), Some(bounding_box)) =
            (geometry::centroid(&points), geometry::bounding_box(&points))
        else {
            continue;
        };

        let max_pairwise_distance_km = geometry::max_pairwise_distance_km(&points);
        let is_wide = points.len() >= 2
            && wide_group::is_wide_distance(max_pairwise_distance_km, options.wide_group_threshold_km);
        let placement = resolver.place(centroid);

        grouped_ids.extend(members.iter().map(|m| m.id.clone()));

        records.push(ClusterRecord {
            group: group.clone(),
            member_count: members.len(),
            radius: geometry::radius(&points, centroid),
            members,
            centroid,
            adjusted_position: placement.position,
            is_position_adjusted: placement.is_adjusted,
            bounding_box,
            color: options.colour_for_index(index),
            max_pairwise_distance_km,
            is_wide,
        });
    }

    let mut ungrouped_seen: AHashSet<&str> = AHashSet::new();
    let ungrouped: Vec<GeocodedContact> = contacts
        .iter()
        .filter(|c| !grouped_ids.contains(c.id.as_str()))
        .filter(|c| ungrouped_seen.insert(c.id.as_str()))
        .filter_map(Contact::geocoded)
        .collect();

    tracing::info!(
        "Built {} cluster records from {} groups, {} ungrouped contacts",
        records.len(),
        groups.len(),
        ungrouped.len()
    );

    ClusterBuild { records, ungrouped }
}
