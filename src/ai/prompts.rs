/// Default prompt for the rename workflow; the answer becomes the file name
pub const RENAME_PROMPT: &str = "Describe this image in 4-5 words";

/// Default prompt for the metadata workflow; the answer is stored verbatim
pub const METADATA_PROMPT: &str = "Describe this image in detail.";

/// Pick the caller's prompt if it has any content, otherwise the fallback.
pub fn resolve_prompt<'a>(custom: Option<&'a str>, fallback: &'a str) -> &'a str {
    match custom {
        Some(p) if !p.trim().is_empty() => p,
        _ => fallback,
    }
}
