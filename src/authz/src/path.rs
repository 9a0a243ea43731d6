//! Dotted field paths
//!
//! A field path addresses an attribute, possibly nested inside a JSON blob
//! column or inside a related entity's schema: `name`, `settings.theme`,
//! `manager.group_id`. Nesting depth is unbounded.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Separator between path segments
pub const SEPARATOR: char = '.';

static FIELD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("static regex")
});

/// Whether `path` is a well-formed dotted field path
pub fn is_valid(path: &str) -> bool {
    FIELD_PATH.is_match(path)
}

/// Join a prefix and a name; an empty prefix yields the name itself
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", prefix, SEPARATOR, name)
    }
}

/// First segment of a path
pub fn head(path: &str) -> &str {
    path.split(SEPARATOR).next().unwrap_or(path)
}

/// Names visible directly below `prefix`
///
/// Takes every path that extends `prefix` by at least one segment, strips the
/// prefix and keeps the next segment. With an empty prefix this yields the
/// top-level names.
pub fn names_under<'a, I>(paths: I, prefix: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let depth = if prefix.is_empty() {
        0
    } else {
        prefix.split(SEPARATOR).count()
    };
    let lead = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}{}", prefix, SEPARATOR)
    };

    paths
        .into_iter()
        .filter(|path| path.starts_with(&lead) && path.as_str() != prefix)
        .filter_map(|path| path.split(SEPARATOR).nth(depth).map(str::to_string))
        .collect()
}

/// Paths strictly below `prefix`, with the prefix removed
pub fn strip_prefix<'a, I>(paths: I, prefix: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let lead = format!("{}{}", prefix, SEPARATOR);
    paths
        .into_iter()
        .filter_map(|path| path.strip_prefix(&lead).map(str::to_string))
        .collect()
}
