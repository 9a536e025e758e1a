//! Language-code normalization and validation.
//!
//! Every streaming session is gated by this module: the upstream provider
//! requires the source language as a BCP-47 `lang-REGION` pair and target
//! languages as bare ISO 639-1 codes. Loose client tags (`ja`, `EN-us`,
//! `fr-FR`) are normalized once at session construction; stored codes are
//! always the normalized forms and never fail re-validation.

use crate::error::ErrorCode;

/// Canonical regions for bare two-letter source codes.
///
/// A source tag without a region is completed from this table; a miss is a
/// validation failure rather than a guess.
const DEFAULT_REGIONS: [(&str, &str); 16] = [
    ("ja", "JP"),
    ("en", "US"),
    ("zh", "CN"),
    ("ko", "KR"),
    ("es", "ES"),
    ("fr", "FR"),
    ("de", "DE"),
    ("it", "IT"),
    ("pt", "BR"),
    ("ru", "RU"),
    ("ar", "SA"),
    ("hi", "IN"),
    ("th", "TH"),
    ("vi", "VN"),
    ("id", "ID"),
    ("ms", "MY"),
];

/// Error returned when a language tag cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageError {
    /// The tag was empty (or whitespace only).
    Empty,
    /// The tag contained a hyphen but not exactly two non-empty parts.
    Malformed(String),
    /// The bare code has no canonical region in the lookup table.
    UnknownLanguage(String),
}

impl ErrorCode for LanguageError {
    fn code(&self) -> &'static str {
        "invalid_language_code"
    }
}

impl std::fmt::Display for LanguageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty language code"),
            Self::Malformed(tag) => write!(f, "malformed language tag: {tag}"),
            Self::UnknownLanguage(tag) => write!(f, "unknown language code: {tag}"),
        }
    }
}

impl std::error::Error for LanguageError {}

/// Normalizes a source-language tag to BCP-47 `lang-REGION` form.
///
/// Lowercases the language part and uppercases the region. A tag with a
/// hyphen must split into exactly two non-empty parts; a bare code is
/// completed from the canonical region table.
///
/// # Examples
///
/// ```
/// use lingo_core::language::normalize_source;
///
/// assert_eq!(normalize_source("ja").unwrap(), "ja-JP");
/// assert_eq!(normalize_source("EN-us").unwrap(), "en-US");
/// assert!(normalize_source("xx").is_err());
/// assert!(normalize_source("ja-JP-Osaka").is_err());
/// ```
pub fn normalize_source(tag: &str) -> Result<String, LanguageError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(LanguageError::Empty);
    }

    if tag.contains('-') {
        let mut parts = tag.splitn(3, '-');
        let lang = parts.next().unwrap_or_default();
        let region = parts.next().unwrap_or_default();
        if lang.is_empty() || region.is_empty() || parts.next().is_some() {
            return Err(LanguageError::Malformed(tag.to_string()));
        }
        return Ok(format!(
            "{}-{}",
            lang.to_ascii_lowercase(),
            region.to_ascii_uppercase()
        ));
    }

    let lang = tag.to_ascii_lowercase();
    DEFAULT_REGIONS
        .iter()
        .find(|(code, _)| *code == lang)
        .map(|(code, region)| format!("{code}-{region}"))
        .ok_or_else(|| LanguageError::UnknownLanguage(tag.to_string()))
}

/// Normalizes a target-language tag to a bare lowercase ISO 639-1 code.
///
/// A hyphenated tag is truncated at the first hyphen (`en-US` → `en`).
///
/// # Examples
///
/// ```
/// use lingo_core::language::normalize_target;
///
/// assert_eq!(normalize_target("EN").unwrap(), "en");
/// assert_eq!(normalize_target("en-US").unwrap(), "en");
/// assert!(normalize_target("  ").is_err());
/// ```
pub fn normalize_target(tag: &str) -> Result<String, LanguageError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(LanguageError::Empty);
    }

    let bare = tag.split('-').next().unwrap_or_default();
    if bare.is_empty() {
        return Err(LanguageError::Malformed(tag.to_string()));
    }
    Ok(bare.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─────────────────────────────────────────────────────────────────────────
    // Source Normalization
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn bare_codes_complete_from_table() {
        assert_eq!(normalize_source("ja").unwrap(), "ja-JP");
        assert_eq!(normalize_source("en").unwrap(), "en-US");
        assert_eq!(normalize_source("pt").unwrap(), "pt-BR");
        assert_eq!(normalize_source("ms").unwrap(), "ms-MY");
    }

    #[test]
    fn hyphenated_source_is_case_folded() {
        assert_eq!(normalize_source("JA-jp").unwrap(), "ja-JP");
        assert_eq!(normalize_source("zh-cn").unwrap(), "zh-CN");
    }

    #[test]
    fn source_trims_whitespace() {
        assert_eq!(normalize_source("  ja-JP  ").unwrap(), "ja-JP");
    }

    #[test]
    fn empty_source_is_rejected() {
        assert_eq!(normalize_source(""), Err(LanguageError::Empty));
        assert_eq!(normalize_source("   "), Err(LanguageError::Empty));
    }

    #[test]
    fn unknown_bare_source_is_rejected() {
        assert_eq!(
            normalize_source("xx"),
            Err(LanguageError::UnknownLanguage("xx".into()))
        );
    }

    #[test]
    fn two_hyphen_source_is_rejected() {
        assert!(matches!(
            normalize_source("ja-JP-Osaka"),
            Err(LanguageError::Malformed(_))
        ));
    }

    #[test]
    fn dangling_hyphen_source_is_rejected() {
        assert!(matches!(
            normalize_source("ja-"),
            Err(LanguageError::Malformed(_))
        ));
        assert!(matches!(
            normalize_source("-JP"),
            Err(LanguageError::Malformed(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Target Normalization
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn target_lowercases_bare_codes() {
        assert_eq!(normalize_target("EN").unwrap(), "en");
        assert_eq!(normalize_target("fr").unwrap(), "fr");
    }

    #[test]
    fn target_truncates_at_first_hyphen() {
        assert_eq!(normalize_target("en-US").unwrap(), "en");
        assert_eq!(normalize_target("zh-Hans-CN").unwrap(), "zh");
    }

    #[test]
    fn empty_target_is_rejected() {
        assert_eq!(normalize_target(" "), Err(LanguageError::Empty));
    }

    #[test]
    fn leading_hyphen_target_is_rejected() {
        assert!(matches!(
            normalize_target("-US"),
            Err(LanguageError::Malformed(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Round Trips
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn normalized_source_revalidates() {
        for (code, _) in DEFAULT_REGIONS {
            let normalized = normalize_source(code).unwrap();
            assert_eq!(normalize_source(&normalized).unwrap(), normalized);
        }
    }

    #[test]
    fn target_plus_region_round_trips_to_source_form() {
        for (code, region) in DEFAULT_REGIONS {
            let target = normalize_target(code).unwrap();
            let rebuilt = format!("{target}-{region}");
            assert_eq!(normalize_source(&rebuilt).unwrap(), rebuilt);
        }
    }
}
