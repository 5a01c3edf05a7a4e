//! Custom format definitions (spec.md §3 "Custom Format") and the
//! specification-matching rule: `value` is a case-insensitive regex
//! except when `implementation` names a resolution check, in which case
//! `value` is an integer height matched as `\b<height>p?\b`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSpecificationFields {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSpecification {
    pub implementation: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub negate: bool,
    pub fields: FormatSpecificationFields,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomFormat {
    pub name: String,
    pub score: i64,
    pub specifications: Vec<FormatSpecification>,
}

impl FormatSpecification {
    fn is_resolution(&self) -> bool {
        self.implementation.to_lowercase().contains("resolution")
    }

    /// Whether this spec's pattern matches `title`. Returns `None` when
    /// the spec can't be evaluated at all (e.g. a resolution value that
    /// isn't a number), which the caller treats as "did not contribute".
    fn matches(&self, title: &str) -> Option<bool> {
        if self.is_resolution() {
            let height = self.fields.value.as_i64().or_else(|| self.fields.value.as_str().and_then(|s| s.parse().ok()))?;
            let pattern = resolution_pattern(height);
            Some(pattern.is_match(title))
        } else {
            let pattern_str = self.fields.value.as_str()?;
            let re = Regex::new(&format!("(?i){pattern_str}")).ok()?;
            Some(re.is_match(title))
        }
    }
}

static RESOLUTION_CACHE: Lazy<std::sync::Mutex<std::collections::HashMap<i64, Regex>>> = Lazy::new(|| std::sync::Mutex::new(std::collections::HashMap::new()));

fn resolution_pattern(height: i64) -> Regex {
    let mut cache = RESOLUTION_CACHE.lock().unwrap();
    cache.entry(height).or_insert_with(|| Regex::new(&format!(r"(?i)\b{height}p?\b")).expect("valid regex")).clone()
}

impl CustomFormat {
    /// A format contributes its score iff at least one required
    /// positive spec matches, no required negate spec matches, and at
    /// least one spec in the format was evaluable (spec.md §3).
    pub fn evaluate(&self, title: &str) -> Option<i64> {
        let required: Vec<&FormatSpecification> = self.specifications.iter().filter(|s| s.required).collect();
        if required.is_empty() {
            return None;
        }

        let (positive, negate): (Vec<_>, Vec<_>) = required.into_iter().partition(|s| !s.negate);

        let mut evaluated_any = false;
        let mut positive_matched = false;
        for spec in &positive {
            if let Some(matched) = spec.matches(title) {
                evaluated_any = true;
                if matched {
                    positive_matched = true;
                }
            }
        }

        let mut negate_matched = false;
        for spec in &negate {
            if let Some(matched) = spec.matches(title) {
                evaluated_any = true;
                if matched {
                    negate_matched = true;
                }
            }
        }

        if !evaluated_any || negate_matched || !positive_matched {
            return None;
        }
        Some(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(implementation: &str, value: serde_json::Value, required: bool, negate: bool) -> FormatSpecification {
        FormatSpecification { implementation: implementation.to_string(), required, negate, fields: FormatSpecificationFields { value } }
    }

    #[test]
    fn resolution_spec_matches_height_with_optional_p() {
        let fmt = CustomFormat { name: "UHD".into(), score: 100, specifications: vec![spec("ResolutionSpec", serde_json::json!(2160), true, false)] };
        assert_eq!(fmt.evaluate("Foo.2160p.x265.mkv"), Some(100));
        assert_eq!(fmt.evaluate("Foo.1080p.x265.mkv"), None);
    }

    #[test]
    fn negate_spec_blocks_contribution_when_matched() {
        let fmt = CustomFormat {
            name: "x265-uhd".into(),
            score: -50,
            specifications: vec![
                spec("ResolutionSpec", serde_json::json!(2160), true, false),
                spec("ReleaseTitleSpec", serde_json::json!("x265"), true, true),
            ],
        };
        assert_eq!(fmt.evaluate("Foo.2160p.x265.mkv"), None);
        assert_eq!(fmt.evaluate("Foo.2160p.x264.mkv"), Some(-50));
    }

    #[test]
    fn negate_only_spec_never_contributes() {
        let fmt = CustomFormat { name: "no-positive".into(), score: 10, specifications: vec![spec("ReleaseTitleSpec", serde_json::json!("x265"), true, true)] };
        assert_eq!(fmt.evaluate("Foo.2160p.x264.mkv"), None);
        assert_eq!(fmt.evaluate("Foo.2160p.x265.mkv"), None);
    }

    #[test]
    fn no_required_specs_never_contributes() {
        let fmt = CustomFormat { name: "noop".into(), score: 10, specifications: vec![spec("ReleaseTitleSpec", serde_json::json!("x265"), false, false)] };
        assert_eq!(fmt.evaluate("anything"), None);
    }
}
