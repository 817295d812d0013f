//! Description text → file stem
//!
//! Pure string functions; nothing here touches the filesystem.

use super::{CaseConversion, NamingPolicy, PLACEHOLDER_STEM};

const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// Build a filesystem-safe stem from raw model output.
///
/// Steps run in a fixed order: trim, strip trailing punctuation, case
/// conversion, pattern collapse, word-boundary truncation. The result is
/// never empty and never contains a path separator.
pub fn sanitize(raw: &str, policy: &NamingPolicy) -> String {
    let mut text = raw.trim().to_string();

    if policy.strip_punctuation {
        text = text.trim_end_matches(TRAILING_PUNCTUATION).to_string();
    }

    text = convert_case(&text, policy.case);

    text = if policy.collapse_pattern {
        collapse(&text, policy.separator)
    } else {
        text.chars()
            .filter(|c| !matches!(c, '/' | '\\') && !c.is_control())
            .collect::<String>()
            .trim()
            .to_string()
    };

    let text = truncate_words(&text, policy.separator, policy.max_length.max(1));

    if text.is_empty() || text.chars().all(|c| c == '.') {
        PLACEHOLDER_STEM.to_string()
    } else {
        text
    }
}

/// Stem plus the original extension. `extension` may carry a leading dot.
pub fn candidate_filename(raw: &str, extension: &str, policy: &NamingPolicy) -> String {
    let stem = sanitize(raw, policy);
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Clean up a name that is already on disk: every non-alphanumeric character
/// in the stem becomes `-`, runs collapse, and the extension is kept as is.
pub fn normalize_existing_name(file_name: &str) -> String {
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };

    let mut cleaned = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && cleaned.ends_with('-') {
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim_matches('-');
    let cleaned = if cleaned.is_empty() { PLACEHOLDER_STEM } else { cleaned };

    match extension {
        Some(ext) => format!("{}.{}", cleaned, ext),
        None => cleaned.to_string(),
    }
}

fn convert_case(text: &str, case: CaseConversion) -> String {
    match case {
        CaseConversion::Lower => text.to_lowercase(),
        CaseConversion::Upper => text.to_uppercase(),
        CaseConversion::None => text.to_string(),
        CaseConversion::Title => {
            let mut out = String::with_capacity(text.len());
            let mut in_word = false;
            for c in text.chars() {
                if c.is_alphabetic() {
                    if in_word {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    in_word = true;
                } else {
                    out.push(c);
                    in_word = false;
                }
            }
            out
        }
    }
}

fn collapse(text: &str, separator: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars() {
        if c.is_whitespace() || c == separator {
            pending_separator = true;
        } else if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push(separator);
            }
            pending_separator = false;
            out.push(c);
        }
    }
    out
}

fn truncate_words(text: &str, separator: char, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }

    let mut out = String::new();
    let mut out_len = 0;
    for word in text.split(separator).filter(|w| !w.is_empty()) {
        let word_len = word.chars().count();
        let needed = if out.is_empty() { word_len } else { out_len + 1 + word_len };
        if needed > max_length {
            break;
        }
        if !out.is_empty() {
            out.push(separator);
        }
        out.push_str(word);
        out_len = needed;
    }

    if out.is_empty() {
        let hard: String = text.chars().take(max_length).collect();
        return hard.trim_matches(separator).to_string();
    }
    out
}
