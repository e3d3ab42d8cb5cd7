//! Rule evaluation. Pure functions over already-loaded rules so the manager and the
//! index push-down share one decision procedure.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::model::{Action, Effect, PermissionRule};

const PATTERN_CACHE_CAP: usize = 1024;

static PATTERN_CACHE: Lazy<RwLock<HashMap<String, Option<Regex>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// `*` matches any run of characters, slashes included; everything else is literal.
/// The result is anchored at both ends.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{escaped}$")).ok()
}

fn cached_match(pattern: &str, resource: &str) -> bool {
    if let Some(compiled) = PATTERN_CACHE.read().get(pattern) {
        return compiled.as_ref().is_some_and(|rx| rx.is_match(resource));
    }
    let compiled = glob_to_regex(pattern);
    let hit = compiled.as_ref().is_some_and(|rx| rx.is_match(resource));
    let mut cache = PATTERN_CACHE.write();
    if cache.len() >= PATTERN_CACHE_CAP { cache.clear(); }
    cache.insert(pattern.to_string(), compiled);
    hit
}

pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    pattern == "*" || pattern == resource || (pattern.contains('*') && cached_match(pattern, resource))
}

pub fn rule_matches(rule: &PermissionRule, action: Action, resource: &str) -> bool {
    let action_ok = rule.actions.iter().any(|a| *a == Action::All || *a == action);
    action_ok && rule.resources.iter().any(|p| resource_matches(p, resource))
}

/// Deny precedence: any matching deny rule refuses, otherwise any matching allow grants,
/// otherwise the default is deny.
pub fn decide<'a>(rules: impl IntoIterator<Item = &'a PermissionRule>, action: Action, resource: &str) -> bool {
    let mut allowed = false;
    for rule in rules {
        if !rule_matches(rule, action, resource) {
            continue;
        }
        match rule.effect {
            Effect::Deny => return false,
            Effect::Allow => allowed = true,
        }
    }
    allowed
}
