//! Scoring a release title against an instance's custom formats and
//! picking the best candidate that satisfies a quality profile's tiers.

use crate::indexer::candidate::Candidate;
use crate::scoring::format::CustomFormat;
use crate::scoring::profile::QualityProfile;

/// Sum the scores of every custom format that contributes for `title`,
/// joining their names into a human-readable breakdown. An empty
/// breakdown renders as `"-"`.
pub fn score_release(title: &str, custom_formats: &[CustomFormat]) -> (i64, String) {
    let mut total = 0i64;
    let mut parts = Vec::new();

    for format in custom_formats {
        if let Some(contribution) = format.evaluate(title) {
            total += contribution;
            parts.push(format!("{} {:+}", format.name, contribution));
        }
    }

    let breakdown = if parts.is_empty() { "-".to_string() } else { parts.join(", ") };
    (total, breakdown)
}

/// Restrict `candidates` to those matching some enabled tier in
/// `profile`, score the survivors, and return the highest scorer
/// (ties broken by title, ascending). `None` if nothing survives the
/// tier filter. Callers that need a minimum score gate apply it
/// themselves against the returned score.
pub fn best_result_matching_profile<'a>(candidates: &'a [Candidate], profile: &QualityProfile, custom_formats: &[CustomFormat]) -> Option<(&'a Candidate, i64, String)> {
    let mut scored: Vec<(&Candidate, i64, String)> = candidates
        .iter()
        .filter(|c| profile.matches_any_tier(&c.title))
        .map(|c| {
            let (score, breakdown) = score_release(&c.title, custom_formats);
            (c, score, breakdown)
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.title.cmp(&b.0.title)));
    scored.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::format::{FormatSpecification, FormatSpecificationFields};
    use crate::scoring::profile::{QualityTier};

    fn uhd_format() -> CustomFormat {
        CustomFormat {
            name: "UHD".into(),
            score: 100,
            specifications: vec![FormatSpecification { implementation: "ResolutionSpec".into(), required: true, negate: false, fields: FormatSpecificationFields { value: serde_json::json!(2160) } }],
        }
    }

    fn profile(tier_name: &str) -> QualityProfile {
        QualityProfile {
            id: "p1".into(),
            name: "Ultra-HD".into(),
            tiers: vec![QualityTier { id: "t1".into(), name: tier_name.into(), enabled: true, order: 0 }],
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
    fn score_release_sums_contributing_formats_and_joins_breakdown() {
        let formats = vec![uhd_format()];
        let (score, breakdown) = score_release("Movie.2160p.WEB-DL", &formats);
        assert_eq!(score, 100);
        assert_eq!(breakdown, "UHD +100");
    }

    #[test]
    fn score_release_empty_breakdown_is_dash() {
        let formats = vec![uhd_format()];
        let (score, breakdown) = score_release("Movie.1080p.WEB-DL", &formats);
        assert_eq!(score, 0);
        assert_eq!(breakdown, "-");
    }

    #[test]
    fn best_result_filters_by_tier_then_sorts_by_score_desc() {
        let candidates = vec![
            Candidate { title: "Movie.1080p.WEB-DL".into(), nzb_url: "u1".into(), size_bytes: 1 },
            Candidate { title: "Movie.2160p.WEB-DL".into(), nzb_url: "u2".into(), size_bytes: 2 },
        ];
        let formats = vec![uhd_format()];
        let p = profile("WEB-2160p");
        let (best, score, breakdown) = best_result_matching_profile(&candidates, &p, &formats).expect("one survivor");
        assert_eq!(best.nzb_url, "u2");
        assert_eq!(score, 100);
        assert_eq!(breakdown, "UHD +100");
    }

    #[test]
    fn best_result_none_when_nothing_matches_tier() {
        let candidates = vec![Candidate { title: "Movie.480p.DVD".into(), nzb_url: "u1".into(), size_bytes: 1 }];
        let formats = vec![uhd_format()];
        let p = profile("WEB-2160p");
        assert!(best_result_matching_profile(&candidates, &p, &formats).is_none());
    }

    #[test]
    fn ties_break_by_title_ascending() {
        let candidates = vec![
            Candidate { title: "Zeta.2160p.WEB-DL".into(), nzb_url: "z".into(), size_bytes: 1 },
            Candidate { title: "Alpha.2160p.WEB-DL".into(), nzb_url: "a".into(), size_bytes: 1 },
        ];
        let p = profile("WEB-2160p");
        let (best, _, _) = best_result_matching_profile(&candidates, &p, &[]).expect("survivors present");
        assert_eq!(best.nzb_url, "a");
    }
}
