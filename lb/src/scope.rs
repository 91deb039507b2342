//! Path scope normalization and conservative overlap testing
//!
//! A scope pattern is a `/`-separated relative path that may contain glob
//! wildcards. A pattern without wildcards names a file or a directory and
//! everything beneath it; a trailing `/**` says the same thing explicitly.
//!
//! [`overlaps`] answers "could these two patterns ever denote a common path?".
//! It may say yes when the true answer is no, but never the reverse.
//! `{x,y}` alternation is expanded before comparing; a pattern with too many
//! alternatives, or braces that do not pair up, overlaps everything.

use crate::error::{CoordError, CoordResult};

const GLOBSTAR: &str = "**";
const WILDCARD_CHARS: &[char] = &['*', '?', '[', ']', '{', '}'];
const MAX_ALTERNATIVES: usize = 64;

/// Normalize a scope pattern to its canonical form
///
/// - `\` becomes `/`, repeated slashes collapse, `.` segments drop
/// - `..` pops the previous segment (kept literally when nothing is left to pop)
/// - leading `/` and trailing `/` are removed
/// - a trailing `**` is kept as the "directory and all descendants" marker
///
/// Returns a validation error when nothing is left, so an empty pattern is
/// never mistaken for "everything".
pub fn normalize(pattern: &str) -> CoordResult<String> {
    let unified = pattern.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." && last != GLOBSTAR => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    // Adjacent globstars are redundant: "a/**/**" == "a/**"
    segments.dedup_by(|a, b| *a == GLOBSTAR && *b == GLOBSTAR);

    if segments.is_empty() {
        return Err(CoordError::validation(format!(
            "scope pattern {:?} is empty after normalization",
            pattern
        )));
    }

    Ok(segments.join("/"))
}

/// Normalize every pattern of a scope, dropping duplicates but keeping order
pub fn normalize_scope(patterns: &[String]) -> CoordResult<Vec<String>> {
    if patterns.is_empty() {
        return Err(CoordError::validation("scope must contain at least one path pattern"));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let canonical = normalize(pattern)?;
        if !normalized.contains(&canonical) {
            normalized.push(canonical);
        }
    }
    Ok(normalized)
}

/// Whether two normalized patterns could denote overlapping paths
///
/// True when one is a directory-tree ancestor of the other, when either reaches
/// a `**` segment while all earlier segments are compatible, or when every
/// compared segment could match a common name.
pub fn overlaps(a: &str, b: &str) -> bool {
    if !a.contains('{') && !b.contains('{') {
        return segments_overlap(a, b);
    }
    match (alternatives(a), alternatives(b)) {
        (Some(xs), Some(ys)) => xs.iter().any(|x| ys.iter().any(|y| segments_overlap(x, y))),
        _ => true,
    }
}

fn segments_overlap(a: &str, b: &str) -> bool {
    let a_segments: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b_segments: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();

    for (sa, sb) in a_segments.iter().zip(b_segments.iter()) {
        if is_globstar(sa) || is_globstar(sb) {
            return true;
        }
        if !segments_compatible(sa, sb) {
            return false;
        }
    }

    // Every compared segment is compatible and one side ran out: the shorter
    // pattern is an ancestor of (or equal to) the longer.
    true
}

/// Normalized brace expansions of `pattern`
///
/// None when the expansion is too large or an alternative normalizes to
/// nothing; callers then assume overlap.
fn alternatives(pattern: &str) -> Option<Vec<String>> {
    let mut done = Vec::new();
    let mut pending = vec![pattern.to_string()];

    while let Some(candidate) = pending.pop() {
        match first_group(&candidate) {
            Some((head, options, tail)) => {
                pending.extend(options.iter().map(|option| format!("{}{}{}", head, option, tail)));
            }
            None => done.push(normalize(&candidate).ok()?),
        }
        if done.len() + pending.len() > MAX_ALTERNATIVES {
            return None;
        }
    }
    Some(done)
}

/// Split the first balanced `{..}` group into head, top-level options and tail
fn first_group(pattern: &str) -> Option<(&str, Vec<&str>, &str)> {
    let open = pattern.find('{')?;
    let mut depth = 0usize;
    let mut start = open + 1;
    let mut options = Vec::new();

    for (offset, c) in pattern[open..].char_indices() {
        let i = open + offset;
        match c {
            '{' => depth += 1,
            ',' if depth == 1 => {
                options.push(&pattern[start..i]);
                start = i + 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    options.push(&pattern[start..i]);
                    return Some((&pattern[..open], options, &pattern[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether any pattern of `a` could overlap any pattern of `b`
pub fn scopes_overlap(a: &[String], b: &[String]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| overlaps(pa, pb)))
}

fn is_globstar(segment: &str) -> bool {
    segment.contains(GLOBSTAR)
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(WILDCARD_CHARS)
}

/// Whether two single path segments could match the same name
fn segments_compatible(a: &str, b: &str) -> bool {
    match (has_wildcard(a), has_wildcard(b)) {
        (false, false) => a == b,
        (true, false) => literal_matches(a, b),
        (false, true) => literal_matches(b, a),
        (true, true) => affixes_compatible(a, b),
    }
}

fn literal_matches(pattern: &str, literal: &str) -> bool {
    // glob has no alternation; a brace left here did not pair up
    if pattern.contains(['{', '}']) {
        return true;
    }
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(literal),
        // Unparseable pattern: cannot rule anything out
        Err(_) => true,
    }
}

/// Two wildcard segments are disjoint only if their literal prefixes or
/// literal suffixes cannot both hold for one name.
fn affixes_compatible(a: &str, b: &str) -> bool {
    let (a_prefix, a_suffix) = literal_affixes(a);
    let (b_prefix, b_suffix) = literal_affixes(b);

    let prefix_ok = a_prefix.starts_with(b_prefix) || b_prefix.starts_with(a_prefix);
    let suffix_ok = a_suffix.ends_with(b_suffix) || b_suffix.ends_with(a_suffix);
    prefix_ok && suffix_ok
}

fn literal_affixes(segment: &str) -> (&str, &str) {
    let prefix_end = segment.find(WILDCARD_CHARS).unwrap_or(segment.len());
    let suffix_start = segment.rfind(WILDCARD_CHARS).map(|i| i + 1).unwrap_or(0);
    (&segment[..prefix_end], &segment[suffix_start..])
}
