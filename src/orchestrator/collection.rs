//! Per-instance library entries the orchestrator tracks acquisition
//! against (spec.md §3 "Collection Item").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Requested,
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MinimumAvailability {
    Announced,
    InCinemas,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionItem {
    pub tmdb_id: Option<u64>,
    pub title: String,
    pub year: Option<u32>,
    pub status: CollectionStatus,
    pub root_folder: String,
    pub quality_profile: String,
    pub minimum_availability: MinimumAvailability,
    pub requested_at: String,
    pub in_cinemas: Option<String>,
    pub digital_release: Option<String>,
    pub physical_release: Option<String>,
    #[serde(default)]
    pub media_info: Option<serde_json::Value>,
}

impl CollectionItem {
    /// Whether `self` has reached the caller-supplied availability
    /// threshold, judged by whichever release-date field corresponds
    /// to the threshold having already passed. A missing date field is
    /// treated as "not yet met" rather than panicking, since release
    /// calendars are frequently incomplete.
    pub fn meets_availability(&self, now_iso8601: &str) -> bool {
        let threshold_date = match self.minimum_availability {
            MinimumAvailability::Announced => return true,
            MinimumAvailability::InCinemas => self.in_cinemas.as_deref(),
            MinimumAvailability::Released => self.digital_release.as_deref().or(self.physical_release.as_deref()),
        };
        match threshold_date {
            Some(date) => date.as_bytes() <= now_iso8601.as_bytes(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(minimum_availability: MinimumAvailability, in_cinemas: Option<&str>, digital: Option<&str>) -> CollectionItem {
        CollectionItem {
            tmdb_id: Some(1),
            title: "Movie".into(),
            year: Some(2026),
            status: CollectionStatus::Requested,
            root_folder: "/movies".into(),
            quality_profile: "p1".into(),
            minimum_availability,
            requested_at: "2026-01-01T00:00:00Z".into(),
            in_cinemas: in_cinemas.map(String::from),
            digital_release: digital.map(String::from),
            physical_release: None,
            media_info: None,
        }
    }

    #[test]
    fn announced_is_always_met() {
        assert!(item(MinimumAvailability::Announced, None, None).meets_availability("2026-01-01"));
    }

    #[test]
    fn missing_threshold_date_is_not_met() {
        assert!(!item(MinimumAvailability::Released, None, None).meets_availability("2026-01-01"));
    }

    #[test]
    fn released_compares_against_digital_release_date() {
        let i = item(MinimumAvailability::Released, None, Some("2026-01-01"));
        assert!(i.meets_availability("2026-06-01"));
        assert!(!i.meets_availability("2025-06-01"));
    }
}
