//! Record ID generation and resolution
//!
//! All IDs use the format: `{kind}-{uuid-v7}`
//! Example: `lock-01963c2e-5b8a-7d21-9f0e-3c4b5a697887`
//!
//! UUIDv7 sorts by creation time, so listing ids lexically lists records in
//! creation order.

use crate::error::{CoordError, CoordResult};

/// Generate a fresh id for a record kind ("lock", "note")
pub fn generate_id(kind: &str) -> String {
    format!("{}-{}", kind, uuid::Uuid::now_v7())
}

/// Resolve a user-supplied reference against known ids
///
/// An exact match wins. Otherwise the reference must be a prefix of exactly
/// one id, either with or without the `{kind}-` part.
pub fn resolve<'a, I>(kind: &'static str, reference: &str, ids: I) -> CoordResult<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(CoordError::validation(format!("{} id must not be empty", kind)));
    }

    let mut candidates: Vec<String> = Vec::new();
    for id in ids {
        if id == reference {
            return Ok(id.to_string());
        }
        if matches(id, reference) {
            candidates.push(id.to_string());
        }
    }

    match candidates.len() {
        0 => Err(CoordError::NotFound {
            kind,
            id: reference.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => {
            candidates.sort();
            Err(CoordError::validation(format!(
                "{} id {:?} is ambiguous; candidates: {}",
                kind,
                reference,
                candidates.join(", ")
            )))
        }
    }
}

/// Check if an ID matches a partial reference
fn matches(id: &str, reference: &str) -> bool {
    if id.starts_with(reference) {
        return true;
    }

    // Prefix of the uuid part alone
    match id.split_once('-') {
        Some((_, rest)) => rest.starts_with(reference),
        None => false,
    }
}
