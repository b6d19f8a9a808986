//! Filesystem segment to API property name mapping.
//!
//! A raw segment like `root-function` or `api_key-v2` is split on
//! non-alphanumeric boundaries and recombined in camelCase. Rule patterns let
//! callers preserve acronyms (`api` → `API`) or keep segments verbatim. The
//! transformation is pure and idempotent under the default rules.

use once_cell::sync::Lazy;

use crate::error::{SlothletError, SlothletResult};

/// Pattern-based casing rules applied per segment.
///
/// Precedence when several rules match one segment:
/// `leave` > `leave_insensitive` > `preserve_all_upper` / `preserve_all_lower`
/// > `upper` > `lower` > default camelization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizerRules {
    /// Segments matching these patterns are upper-cased (acronyms).
    pub upper: Vec<String>,
    /// Segments matching these patterns are lower-cased.
    pub lower: Vec<String>,
    /// Segments matching these patterns are kept verbatim. Case-sensitive.
    pub leave: Vec<String>,
    /// Like `leave`, but matched case-insensitively.
    pub leave_insensitive: Vec<String>,
    /// Keep segments that are already all upper-case.
    pub preserve_all_upper: bool,
    /// Keep segments that are already all lower-case.
    pub preserve_all_lower: bool,
}

/// The rule set used when the configuration does not provide one.
pub(crate) static DEFAULT_RULES: Lazy<SanitizerRules> = Lazy::new(SanitizerRules::default);

/// How a single pattern matches a segment.
///
/// * `X`: whole-segment match.
/// * `X*` / `*X` / `*X*`: prefix / suffix / substring match.
/// * `**X**`: substring match that requires other characters on both sides,
///   so a standalone `X` segment does not match.
fn pattern_matches(pattern: &str, segment: &str, case_insensitive: bool) -> bool {
    let (pat, seg) = if case_insensitive {
        (pattern.to_lowercase(), segment.to_lowercase())
    } else {
        (pattern.to_owned(), segment.to_owned())
    };

    if let Some(inner) = pat.strip_prefix("**").and_then(|p| p.strip_suffix("**")) {
        if inner.is_empty() {
            return false;
        }
        // Surrounded on both sides: an interior occurrence only.
        return seg
            .match_indices(inner)
            .any(|(i, m)| i > 0 && i + m.len() < seg.len());
    }

    match (pat.strip_prefix('*'), pat.strip_suffix('*')) {
        (Some(rest), _) if rest.ends_with('*') => {
            let inner = &rest[..rest.len() - 1];
            !inner.is_empty() && seg.contains(inner)
        }
        (Some(suffix), None) => !suffix.is_empty() && seg.ends_with(suffix),
        (None, Some(prefix)) => !prefix.is_empty() && seg.starts_with(prefix),
        (None, None) => seg == pat,
        _ => false,
    }
}

fn matches_any(patterns: &[String], segment: &str, case_insensitive: bool) -> bool {
    patterns
        .iter()
        .any(|p| pattern_matches(p, segment, case_insensitive))
}

/// The casing decision for one segment.
enum SegmentAction {
    Leave,
    Upper,
    Lower,
    Camel,
}

fn decide(segment: &str, rules: &SanitizerRules) -> SegmentAction {
    if matches_any(&rules.leave, segment, false)
        || matches_any(&rules.leave_insensitive, segment, true)
    {
        return SegmentAction::Leave;
    }
    let has_alpha = segment.chars().any(|c| c.is_ascii_alphabetic());
    if rules.preserve_all_upper
        && has_alpha
        && segment.chars().all(|c| !c.is_ascii_lowercase())
    {
        return SegmentAction::Leave;
    }
    if rules.preserve_all_lower
        && has_alpha
        && segment.chars().all(|c| !c.is_ascii_uppercase())
    {
        return SegmentAction::Leave;
    }
    if matches_any(&rules.upper, segment, true) {
        return SegmentAction::Upper;
    }
    if matches_any(&rules.lower, segment, true) {
        return SegmentAction::Lower;
    }
    SegmentAction::Camel
}

/// Default camelization for a segment, position-aware.
///
/// An all-caps segment is folded to lower case; a mixed-case segment keeps
/// its interior casing so that sanitized output survives a second pass
/// unchanged.
fn camelize(segment: &str, first: bool) -> String {
    let all_upper = segment.chars().any(|c| c.is_ascii_alphabetic())
        && !segment.chars().any(|c| c.is_ascii_lowercase());
    if all_upper {
        let lowered = segment.to_lowercase();
        return if first { lowered } else { title_case(&lowered) };
    }
    if first {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) => c.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        title_case(segment)
    }
}

fn title_case(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Returns `true` when `name` is usable verbatim as an API property name.
///
/// Function-name preference relies on this: a code-level identifier that is
/// already valid camel/pascal case wins over the sanitized filename.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Maps a filesystem-style segment to an API property name.
///
/// Splits on non-identifier boundaries, applies the per-segment rules and
/// recombines in camelCase. Underscores are identifier characters and do
/// not split, so `multi_defaults` stays `multi_defaults` while
/// `root-function` becomes `rootFunction`. Fails with
/// [`SlothletError::InvalidName`] only when the result is empty.
pub fn sanitize(raw: &str, rules: &SanitizerRules) -> SlothletResult<String> {
    let segments: Vec<&str> = raw
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .collect();

    let mut out = String::with_capacity(raw.len());
    for (i, segment) in segments.iter().enumerate() {
        let piece = match decide(segment, rules) {
            SegmentAction::Leave => (*segment).to_owned(),
            SegmentAction::Upper => segment.to_uppercase(),
            SegmentAction::Lower => segment.to_lowercase(),
            SegmentAction::Camel => camelize(segment, i == 0),
        };
        out.push_str(&piece);
    }

    if out.is_empty() {
        return Err(SlothletError::InvalidName {
            segment: raw.to_owned(),
        });
    }
    Ok(out)
}

/// Sanitizes with the default rule set.
pub fn sanitize_default(raw: &str) -> SlothletResult<String> {
    sanitize(raw, &DEFAULT_RULES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(raw: &str) -> String {
        sanitize_default(raw).unwrap()
    }

    #[test]
    fn splits_and_camelizes() {
        assert_eq!(s("math"), "math");
        assert_eq!(s("root-function"), "rootFunction");
        assert_eq!(s("some.api.key"), "someApiKey");
    }

    #[test]
    fn all_caps_segments_fold_to_lower_by_default() {
        assert_eq!(s("HTTP-server"), "httpServer");
        assert_eq!(s("a-API"), "aApi");
    }

    #[test]
    fn digits_are_kept() {
        assert_eq!(s("v2-parser"), "v2Parser");
        assert_eq!(s("base64"), "base64");
    }

    #[test]
    fn underscores_do_not_split() {
        assert_eq!(s("multi_defaults"), "multi_defaults");
        assert_eq!(s("api_key"), "api_key");
    }

    #[test]
    fn idempotent_under_default_rules() {
        for raw in [
            "root-function",
            "someApiKey",
            "HTTP-server",
            "v2-parser",
            "multi_defaults",
        ] {
            let once = s(raw);
            assert_eq!(s(&once), once, "sanitize not idempotent for {raw}");
        }
    }

    #[test]
    fn upper_rule_preserves_acronyms() {
        let rules = SanitizerRules {
            upper: vec!["api".into(), "id".into()],
            ..SanitizerRules::default()
        };
        assert_eq!(sanitize("user-api-id", &rules).unwrap(), "userAPIID");
    }

    #[test]
    fn leave_is_case_sensitive() {
        let rules = SanitizerRules {
            leave: vec!["WiFi".into()],
            ..SanitizerRules::default()
        };
        assert_eq!(sanitize("WiFi-setup", &rules).unwrap(), "WiFiSetup");
        // `wifi` does not match the case-sensitive rule.
        assert_eq!(sanitize("wifi-setup", &rules).unwrap(), "wifiSetup");
    }

    #[test]
    fn wildcard_patterns() {
        let rules = SanitizerRules {
            upper: vec!["*url*".into()],
            ..SanitizerRules::default()
        };
        assert_eq!(sanitize("base-url", &rules).unwrap(), "baseURL");
        assert_eq!(sanitize("urls", &rules).unwrap(), "URLS");

        let surrounded = SanitizerRules {
            upper: vec!["**db**".into()],
            ..SanitizerRules::default()
        };
        // Standalone `db` segment is excluded by the surrounded form.
        assert_eq!(sanitize("db", &surrounded).unwrap(), "db");
        assert_eq!(sanitize("mydbkey", &surrounded).unwrap(), "MYDBKEY");
    }

    #[test]
    fn preserve_all_upper() {
        let rules = SanitizerRules {
            preserve_all_upper: true,
            ..SanitizerRules::default()
        };
        assert_eq!(sanitize("HTTP-server", &rules).unwrap(), "HTTPServer");
    }

    #[test]
    fn empty_result_is_an_error() {
        assert!(matches!(
            sanitize_default("---"),
            Err(SlothletError::InvalidName { .. })
        ));
    }

    #[test]
    fn identifier_check() {
        assert!(is_valid_identifier("setVolume"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("with-dash"));
        assert!(!is_valid_identifier(""));
    }
}
