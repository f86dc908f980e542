// Copyright Catenary Transit Initiatives

use crate::error::ClusterError;
use crate::spiderfy::DEFAULT_COLLISION_OFFSET_DEG;
use crate::wide_group::DEFAULT_WIDE_GROUP_THRESHOLD_KM;
use rgb::RGB8;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_GROUP_CLUSTER_ZOOM: f64 = 12.0;
pub const DEFAULT_INDIVIDUAL_MARKER_ZOOM: f64 = 15.0;

pub const DEFAULT_GROUP_COLOURS: [RGB8; 10] = [
    RGB8::new(59, 130, 246),
    RGB8::new(239, 68, 68),
    RGB8::new(16, 185, 129),
    RGB8::new(245, 158, 11),
    RGB8::new(139, 92, 246),
    RGB8::new(236, 72, 153),
    RGB8::new(6, 182, 212),
    RGB8::new(132, 204, 22),
    RGB8::new(249, 115, 22),
    RGB8::new(99, 102, 241),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomThresholds {
    /// Below this zoom every group is drawn as one aggregate bubble.
    pub group_clusters: f64,
    /// At or above this zoom every contact gets its own marker.
    pub individual_markers: f64,
}

impl Default for ZoomThresholds {
    fn default() -> Self {
        Self {
            group_clusters: DEFAULT_GROUP_CLUSTER_ZOOM,
            individual_markers: DEFAULT_INDIVIDUAL_MARKER_ZOOM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    pub group_colors: Vec<RGB8>,
    pub zoom_thresholds: ZoomThresholds,
    /// Degrees between a collided centroid and its first displaced neighbour.
    pub collision_offset: f64,
    pub wide_group_threshold_km: f64,
    /// Zoom must move further than this from the last computed zoom before LOD is recomputed.
    pub zoom_hysteresis: f64,
    pub wide_group_fit_delay_ms: u64,
    pub auto_center: bool,
    pub auto_center_delay_ms: u64,
    pub fit_bounds_padding_px: u32,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            group_colors: DEFAULT_GROUP_COLOURS.to_vec(),
            zoom_thresholds: ZoomThresholds::default(),
            collision_offset: DEFAULT_COLLISION_OFFSET_DEG,
            wide_group_threshold_km: DEFAULT_WIDE_GROUP_THRESHOLD_KM,
            zoom_hysteresis: 0.5,
            wide_group_fit_delay_ms: 1500,
            auto_center: true,
            auto_center_delay_ms: 300,
            fit_bounds_padding_px: 50,
        }
    }
}

impl ClusterOptions {
    pub fn from_ron_str(text: &str) -> Result<Self, ClusterError> {
        let options: ClusterOptions = ron::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_ron_file(path: &Path) -> Result<Self, ClusterError> {
        let text = std::fs::read_to_string(path).map_err(|source| ClusterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    /// Applies `GEOCLUSTER_*` environment variables on top of these options.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_f64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        if let Some(v) = parse_f64("GEOCLUSTER_GROUP_CLUSTER_ZOOM") {
            self.zoom_thresholds.group_clusters = v;
        }
        if let Some(v) = parse_f64("GEOCLUSTER_INDIVIDUAL_MARKER_ZOOM") {
            self.zoom_thresholds.individual_markers = v;
        }
        if let Some(v) = parse_f64("GEOCLUSTER_COLLISION_OFFSET") {
            self.collision_offset = v;
        }
        if let Some(v) = parse_f64("GEOCLUSTER_WIDE_GROUP_KM") {
            self.wide_group_threshold_km = v;
        }
        if let Some(v) = lookup("GEOCLUSTER_AUTO_CENTER").and_then(|v| v.trim().parse().ok()) {
            self.auto_center = v;
        }

        self
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        let ZoomThresholds {
            group_clusters,
            individual_markers,
        } = self.zoom_thresholds;

        if !group_clusters.is_finite() || !individual_markers.is_finite() {
            return Err(ClusterError::InvalidOption {
                field: "zoom_thresholds",
                reason: "thresholds must be finite".to_string(),
            });
        }
        if group_clusters > individual_markers {
            return Err(ClusterError::InvalidOption {
                field: "zoom_thresholds",
                reason: format!(
                    "group_clusters ({}) is above individual_markers ({})",
                    group_clusters, individual_markers
                ),
            });
        }

        for (field, value) in [
            ("collision_offset", self.collision_offset),
            ("wide_group_threshold_km", self.wide_group_threshold_km),
            ("zoom_hysteresis", self.zoom_hysteresis),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ClusterError::InvalidOption {
                    field,
                    reason: format!("expected a non-negative number, got {}", value),
                });
            }
        }

        Ok(())
    }

    /// Colour for the group processed at `index`. An empty palette falls back to the defaults.
    pub fn colour_for_index(&self, index: usize) -> RGB8 {
        if self.group_colors.is_empty() {
            DEFAULT_GROUP_COLOURS[index % DEFAULT_GROUP_COLOURS.len()]
        } else {
            self.group_colors[index % self.group_colors.len()]
        }
    }

    pub fn wide_group_fit_delay(&self) -> Duration {
        Duration::from_millis(self.wide_group_fit_delay_ms)
    }

    pub fn auto_center_delay(&self) -> Duration {
        Duration::from_millis(self.auto_center_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    #[test]
    fn test_defaults() {
        let options = ClusterOptions::default();
        assert_eq!(options.zoom_thresholds.group_clusters, 12.0);
        assert_eq!(options.zoom_thresholds.individual_markers, 15.0);
        assert_eq!(options.collision_offset, 0.015);
        assert_eq!(options.wide_group_threshold_km, 500.0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_ron() {
        let options = ClusterOptions::from_ron_str(
            "(wide_group_threshold_km: 250.0, zoom_thresholds: (group_clusters: 10.0))",
        )
        .unwrap();
        assert_eq!(options.wide_group_threshold_km, 250.0);
        assert_eq!(options.zoom_thresholds.group_clusters, 10.0);
        assert_eq!(options.zoom_thresholds.individual_markers, 15.0);
        assert_eq!(options.group_colors.len(), DEFAULT_GROUP_COLOURS.len());
    }

    #[test]
    fn test_ron_palette() {
        let options = ClusterOptions::from_ron_str(
            "(group_colors: [(r: 1, g: 2, b: 3), (r: 4, g: 5, b: 6)])",
        )
        .unwrap();
        assert_eq!(options.colour_for_index(0), RGB8::new(1, 2, 3));
        assert_eq!(options.colour_for_index(3), RGB8::new(4, 5, 6));
    }

    #[test]
    fn test_malformed_ron() {
        assert!(matches!(
            ClusterOptions::from_ron_str("(collision_offset: \"far\")"),
            Err(ClusterError::Config(_))
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut options = ClusterOptions::default();
        options.zoom_thresholds.group_clusters = 16.0;
        assert!(matches!(
            options.validate(),
            Err(ClusterError::InvalidOption {
                field: "zoom_thresholds",
                ..
            })
        ));
    }

    #[test]
    fn test_negative_offset_rejected() {
        let options = ClusterOptions {
            collision_offset: -0.1,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_empty_palette_falls_back() {
        let options = ClusterOptions {
            group_colors: Vec::new(),
            ..Default::default()
        };
        assert_eq!(options.colour_for_index(11), DEFAULT_GROUP_COLOURS[1]);
    }

    #[test]
    fn test_overrides() {
        let mut env = AHashMap::new();
        env.insert("GEOCLUSTER_WIDE_GROUP_KM", "120");
        env.insert("GEOCLUSTER_GROUP_CLUSTER_ZOOM", " 11 ");
        env.insert("GEOCLUSTER_AUTO_CENTER", "false");
        env.insert("GEOCLUSTER_COLLISION_OFFSET", "not a number");

        let options = ClusterOptions::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(options.wide_group_threshold_km, 120.0);
        assert_eq!(options.zoom_thresholds.group_clusters, 11.0);
        assert!(!options.auto_center);
        assert_eq!(options.collision_offset, DEFAULT_COLLISION_OFFSET_DEG);
    }
}
