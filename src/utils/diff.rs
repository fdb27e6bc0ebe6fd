//! `+key` / `-key` diff arrays used by votes and multisignature keysgroups.

use std::collections::BTreeSet;

/// Flips every `+` into `-` and vice versa.
pub fn reverse(diff: &[String]) -> Vec<String> {
    diff.iter()
        .map(|entry| {
            if let Some(key) = entry.strip_prefix('+') {
                format!("-{key}")
            } else if let Some(key) = entry.strip_prefix('-') {
                format!("+{key}")
            } else {
                entry.clone()
            }
        })
        .collect()
}

/// Applies a diff array onto a set. Entries without a sign are ignored.
pub fn apply(set: &mut BTreeSet<String>, diff: &[String]) {
    for entry in diff {
        if let Some(key) = entry.strip_prefix('+') {
            set.insert(key.to_string());
        } else if let Some(key) = entry.strip_prefix('-') {
            set.remove(key);
        }
    }
}

pub fn added(diff: &[String]) -> Vec<String> {
    diff.iter()
        .filter_map(|v| v.strip_prefix('+').map(str::to_string))
        .collect()
}

pub fn removed(diff: &[String]) -> Vec<String> {
    diff.iter()
        .filter_map(|v| v.strip_prefix('-').map(str::to_string))
        .collect()
}
