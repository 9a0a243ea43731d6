//! Request query-string parameters
//!
//! Field selection uses `fields[<type>]=a,b` and relationship inclusion uses
//! `include=a.b,c`. The rewriter edits these parameters in place so the
//! serializer sees the effective selection.

use std::collections::{BTreeMap, BTreeSet};
use url::form_urlencoded;

const INCLUDE: &str = "include";

/// Ordered query-string parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    params: Vec<(String, String)>,
}

fn fields_key(type_name: &str) -> String {
    format!("fields[{}]", type_name)
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl QueryString {
    /// Parse a raw `application/x-www-form-urlencoded` query string
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        Self {
            params: form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Last value of a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every occurrence of `key` with a single value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter().position(|(k, _)| k == key) {
            Some(index) => {
                self.params[index].1 = value;
                let mut seen = false;
                self.params.retain(|(k, _)| {
                    if k != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.params.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.params.retain(|(k, _)| k != key);
    }

    /// Every `fields[<type>]` selection
    pub fn fields(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.params
            .iter()
            .filter_map(|(k, v)| {
                let type_name = k.strip_prefix("fields[")?.strip_suffix(']')?;
                Some((type_name.to_string(), split_list(v).collect()))
            })
            .collect()
    }

    /// Selection for one type; `Some(empty)` means "no attributes"
    pub fn requested_fields(&self, type_name: &str) -> Option<BTreeSet<String>> {
        self.get(&fields_key(type_name))
            .map(|value| split_list(value).collect())
    }

    pub fn set_fields<'a, I>(&mut self, type_name: &str, names: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let value = names.into_iter().cloned().collect::<Vec<_>>().join(",");
        self.set(&fields_key(type_name), value);
    }

    pub fn remove_fields(&mut self, type_name: &str) {
        self.remove(&fields_key(type_name));
    }

    /// Requested include paths, in order, without duplicates
    pub fn include(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for path in self.get(INCLUDE).map(split_list).into_iter().flatten() {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }

    /// Replace the include list; an empty list removes the parameter
    pub fn set_include(&mut self, paths: &[String]) {
        let mut unique: Vec<&String> = Vec::new();
        for path in paths {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        if unique.is_empty() {
            self.remove(INCLUDE);
        } else {
            let joined = unique
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",");
            self.set(INCLUDE, joined);
        }
    }

    /// Re-encode the parameters
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
