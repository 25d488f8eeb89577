//! Shared helpers used across the pipeline and by the surrounding services:
//! the dataset-id codec, cell truncation for samples, and attribute-name
//! keyword expansion.

use std::sync::LazyLock;

use regex::Regex;

/// Characters that survive `encode_dataset_id` unescaped.
static RE_NON_PATH_SAFE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"[^A-Za-z0-9_.-]").unwrap()
});

/// Encode a dataset ID to a format suitable for file names.
///
/// `_` is doubled, every other unsafe character becomes `_XX` with its
/// code point in uppercase hex. The output alphabet is `[A-Za-z0-9_.-]`.
pub fn encode_dataset_id(dataset_id: &str) -> String {
    let doubled = dataset_id.replace('_', "__");
    RE_NON_PATH_SAFE
        .replace_all(&doubled, |caps: &regex::Captures<'_>| {
            let c = caps
                .get(0)
                .map_or('\u{fffd}', |m| m.as_str().chars().next().unwrap_or('\u{fffd}'));
            format!("_{:X}", c as u32)
        })
        .into_owned()
}

/// Decode a dataset ID encoded with [`encode_dataset_id`].
pub fn decode_dataset_id(dataset_id: &str) -> String {
    let chars: Vec<char> = dataset_id.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '_' {
            if i + 1 < chars.len() && chars[i + 1] == '_' {
                out.push('_');
                i += 2;
            } else {
                // _XX hex escape; malformed escapes decode to the replacement char
                let hex: String = chars[i + 1..].iter().take(2).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{fffd}');
                out.push(decoded);
                i += 1 + hex.len();
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Truncate a string, replacing characters over the limit with `"..."`.
///
/// Prefers breaking on a space close to the limit so sample cells stay
/// readable.
pub fn truncate_string(s: &str, limit: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= limit {
        return s.to_owned();
    }
    // Try to find a space in the window [limit - 20, limit - 3)
    let window_start = limit.saturating_sub(20);
    let window_end = limit.saturating_sub(3).max(window_start);
    let space = chars[window_start..window_end]
        .iter()
        .rposition(|&c| c == ' ')
        .map(|p| window_start + p);
    let cut = space.unwrap_or(window_end);
    let mut out: String = chars[..cut].iter().collect();
    out.push_str("...");
    out
}

fn is_delimiter(c: char) -> bool {
    c.is_ascii_punctuation() || c.is_whitespace()
}

/// Expand an attribute name to keywords derived from it.
///
/// Splits on punctuation and whitespace, on digit boundaries in both
/// directions, and on lower-to-upper case transitions, so `firstName2`
/// yields `first`, `Name`, `2`.
pub fn expand_attribute_name(name: &str) -> Vec<String> {
    let name = name.replace(['_', '-'], " ");

    let mut words = Vec::new();
    let mut word = String::new();
    for c in name.chars() {
        if is_delimiter(c) {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            continue;
        }

        if let Some(last) = word.chars().last() {
            let digit_boundary = last.is_ascii_digit() != c.is_ascii_digit();
            let case_boundary = last.is_lowercase() && c.is_uppercase();
            if digit_boundary || case_boundary {
                words.push(std::mem::take(&mut word));
            }
        }

        word.push(c);
    }
    words.push(word);
    words
}
