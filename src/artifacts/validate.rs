//! Field constraints for create and remix requests.

use super::ArtifactInput;

pub const TITLE_MAX_CHARS: usize = 200;
pub const BODY_MIN_CHARS: usize = 20;
pub const BODY_MAX_CHARS: usize = 50_000;
pub const AUTHOR_MAX_CHARS: usize = 80;
pub const MAX_TAGS: usize = 20;
pub const TAG_MAX_CHARS: usize = 32;

/// Check an input and return every problem found. Empty means valid.
///
/// Tags beyond [`MAX_TAGS`] (after normalization) are not an error; they are
/// cut off by [`normalize_tags`].
pub fn validate(input: &ArtifactInput) -> Vec<String> {
    let mut errors = Vec::new();

    match input.title.as_deref().map(str::trim) {
        None | Some("") => errors.push("title is required".to_string()),
        Some(title) if title.chars().count() > TITLE_MAX_CHARS => errors.push(format!(
            "title must be at most {} characters",
            TITLE_MAX_CHARS
        )),
        Some(_) => {}
    }

    match input.body.as_deref().map(str::trim) {
        None | Some("") => errors.push("body is required".to_string()),
        Some(body) => {
            let len = body.chars().count();
            if len < BODY_MIN_CHARS {
                errors.push(format!(
                    "body must be at least {} characters",
                    BODY_MIN_CHARS
                ));
            } else if len > BODY_MAX_CHARS {
                errors.push(format!("body must be at most {} characters", BODY_MAX_CHARS));
            }
        }
    }

    if let Some(author) = input.author.as_deref() {
        if author.trim().chars().count() > AUTHOR_MAX_CHARS {
            errors.push(format!(
                "author must be at most {} characters",
                AUTHOR_MAX_CHARS
            ));
        }
    }

    if let Some(tags) = &input.tags {
        for tag in tags {
            if tag.trim().chars().count() > TAG_MAX_CHARS {
                errors.push(format!(
                    "tag '{}' must be at most {} characters",
                    tag.trim(),
                    TAG_MAX_CHARS
                ));
            }
        }
    }

    errors
}

/// Trim and lower-case tags, drop empties and duplicates (first occurrence
/// wins) and keep at most [`MAX_TAGS`].
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || out.contains(&tag) {
            continue;
        }
        out.push(tag);
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}
