//! Quality profiles (spec.md §3) and the tier-name matcher from §4.9a.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityTier {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityProfile {
    pub id: String,
    pub name: String,
    pub tiers: Vec<QualityTier>,
    pub upgrades_allowed: bool,
    pub upgrade_until_quality: Option<String>,
    pub min_custom_format_score: i64,
    pub upgrade_until_custom_format_score: Option<i64>,
    pub upgrade_score_increment: i64,
    pub language: String,
    #[serde(default)]
    pub is_default: bool,
}

impl QualityProfile {
    pub fn enabled_tier_names(&self) -> Vec<String> {
        self.tiers.iter().filter(|t| t.enabled).map(|t| t.name.to_lowercase()).collect()
    }

    /// Whether `title` matches at least one enabled tier in this profile,
    /// per the §4.9a informative matcher: a resolution token plus a
    /// source token must both appear in the title, tokenized from the
    /// (lowercased) tier name. `"unknown"` matches everything.
    pub fn matches_any_tier(&self, title: &str) -> bool {
        let lower_title = title.to_lowercase();
        self.enabled_tier_names().iter().any(|tier| tier_matches(tier, &lower_title))
    }
}

const RESOLUTION_TOKENS: &[&str] = &["2160", "1080", "720", "480", "sdtv"];
const SOURCE_TOKENS: &[(&str, &[&str])] = &[
    ("web", &["web"]),
    ("bluray", &["bluray", "blu-ray", "brrip", "bdrip"]),
    ("hdtv", &["hdtv"]),
    ("remux", &["remux"]),
    ("dvd", &["dvd"]),
];

fn tier_matches(tier_name: &str, lower_title: &str) -> bool {
    if tier_name == "unknown" {
        return true;
    }

    let wanted_resolution = RESOLUTION_TOKENS.iter().find(|t| tier_name.contains(**t));
    if let Some(res) = wanted_resolution {
        if !lower_title.contains(res) {
            return false;
        }
    }

    let wanted_source = SOURCE_TOKENS.iter().find(|(key, _)| tier_name.contains(key));
    if let Some((key, aliases)) = wanted_source {
        let is_dvd = *key == "dvd";
        let title_has_source = aliases.iter().any(|alias| lower_title.contains(alias));
        if !title_has_source {
            return false;
        }
        if is_dvd && lower_title.contains("dvdscr") {
            return false;
        }
    }

    wanted_resolution.is_some() || wanted_source.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_tier(name: &str) -> QualityProfile {
        QualityProfile {
            id: "p1".into(),
            name: "Test".into(),
            tiers: vec![QualityTier { id: "t1".into(), name: name.into(), enabled: true, order: 0 }],
            upgrades_allowed: true,
            upgrade_until_quality: None,
            min_custom_format_score: 0,
            upgrade_until_custom_format_score: None,
            upgrade_score_increment: 1,
            language: "en".into(),
            is_default: true,
        }
    }

    #[test]
    fn matches_resolution_and_source_tokens() {
        let profile = profile_with_tier("WEB-2160p");
        assert!(profile.matches_any_tier("Some.Movie.2160p.WEB-DL.x265"));
        assert!(!profile.matches_any_tier("Some.Movie.1080p.WEB-DL.x265"));
    }

    #[test]
    fn dvd_tier_excludes_dvdscr() {
        let profile = profile_with_tier("DVD");
        assert!(profile.matches_any_tier("Movie.DVD.rip"));
        assert!(!profile.matches_any_tier("Movie.DVDSCR"));
    }

    #[test]
    fn unknown_tier_matches_everything() {
        let profile = profile_with_tier("Unknown");
        assert!(profile.matches_any_tier("literally.anything"));
    }
}
