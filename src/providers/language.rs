//! Language naming helpers.
//!
//! Clients declare languages by English name ("Hindi") or by code ("hi",
//! "hi-IN"). The recognizer wants a code, the translator prompt reads best
//! with a name.

use isolang::Language;

/// Look up a declared language by ISO 639-1, ISO 639-3 or English name.
pub fn resolve(declared: &str) -> Option<Language> {
    let declared = declared.trim();
    if declared.is_empty() {
        return None;
    }

    let primary = declared
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or(declared);
    let lower = primary.to_ascii_lowercase();

    match lower.len() {
        2 => Language::from_639_1(&lower),
        3 => Language::from_639_3(&lower).or_else(|| Language::from_name(&title_case(declared))),
        _ => Language::from_name(&title_case(declared)),
    }
}

/// Recognition language code for a declared language.
///
/// Region tags that are already codes ("en-US") pass through untouched;
/// names map to their two-letter code; anything unknown falls back.
pub fn recognition_code(declared: &str, fallback: &str) -> String {
    let declared = declared.trim();
    if declared.contains('-') && resolve(declared).is_some() {
        return declared.to_string();
    }

    resolve(declared)
        .and_then(|language| language.to_639_1())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// English display name for a declared language; unknown values pass through.
pub fn display_name(declared: &str) -> String {
    resolve(declared)
        .map(|language| language.to_name().to_string())
        .unwrap_or_else(|| declared.trim().to_string())
}

fn title_case(value: &str) -> String {
    let mut chars = value.trim().chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}
