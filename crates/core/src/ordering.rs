//! Feature installation ordering
//!
//! A round-based topological sort over `dependsOn` and `installsAfter`
//! edges. Each round collects the features whose edges are all satisfied,
//! keeps only those with the highest user-override priority, and commits
//! them in a deterministic tie-break order. An empty round with features
//! remaining means the graph has a cycle.

use crate::errors::{GodevError, GraphError, Result};
use crate::feature_ref::normalize_feature_id;
use crate::features::ResolvedFeature;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Order the resolved features, honoring `overrideFeatureInstallOrder`.
pub fn order_features(
    mut features: Vec<ResolvedFeature>,
    override_order: &[String],
) -> Result<Vec<ResolvedFeature>> {
    if features.is_empty() {
        return Ok(features);
    }

    // installsAfter names resolve through baseName; unknown names are a no-op
    let mut base_name_to_keys: HashMap<String, Vec<String>> = HashMap::new();
    for feature in &features {
        base_name_to_keys
            .entry(feature.base_name.clone())
            .or_default()
            .push(feature.dependency_key.clone());
    }
    for feature in &mut features {
        let mut keys = Vec::new();
        for id in &feature.installs_after_ids {
            if let Some(found) = base_name_to_keys.get(id) {
                keys.extend(found.iter().cloned());
            }
        }
        feature.installs_after_keys = keys;
    }

    let priority = compute_override_priority(override_order);

    let mut order: Vec<ResolvedFeature> = Vec::with_capacity(features.len());
    let mut installed: HashSet<String> = HashSet::new();
    let mut remaining: Vec<ResolvedFeature> = features;

    while !remaining.is_empty() {
        let round: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, feature)| can_install(feature, &installed))
            .map(|(index, _)| index)
            .collect();
        if round.is_empty() {
            let stuck: Vec<&str> = remaining.iter().map(|f| f.base_name.as_str()).collect();
            return Err(GodevError::Graph(GraphError::Cycle {
                path: stuck.join(", "),
            }));
        }

        let max_priority = round
            .iter()
            .filter_map(|&index| priority.get(&remaining[index].base_name))
            .copied()
            .max()
            .unwrap_or(0);
        let commit: HashSet<usize> = round
            .into_iter()
            .filter(|&index| {
                priority
                    .get(&remaining[index].base_name)
                    .copied()
                    .unwrap_or(0)
                    == max_priority
            })
            .collect();
        debug!(
            "committing {} feature(s) at priority {}",
            commit.len(),
            max_priority
        );

        let mut committed = Vec::with_capacity(commit.len());
        let mut kept = Vec::with_capacity(remaining.len() - commit.len());
        for (index, feature) in remaining.into_iter().enumerate() {
            if commit.contains(&index) {
                committed.push(feature);
            } else {
                kept.push(feature);
            }
        }
        remaining = kept;
        committed.sort_by(feature_cmp);
        for feature in committed {
            installed.insert(feature.dependency_key.clone());
            order.push(feature);
        }
    }

    validate_override_usage(&priority, &order)?;
    Ok(order)
}

/// Priority for an override list `[a, b, c]`: `a` gets N, `b` N-1, and so
/// on. Higher priority commits earlier.
fn compute_override_priority(ids: &[String]) -> HashMap<String, i64> {
    let mut priority = HashMap::new();
    let total = ids.len() as i64;
    for (index, id) in ids.iter().enumerate() {
        let normalized = normalize_feature_id(id);
        if normalized.is_empty() {
            continue;
        }
        priority.insert(normalized, total - index as i64);
    }
    priority
}

fn validate_override_usage(
    priority: &HashMap<String, i64>,
    features: &[ResolvedFeature],
) -> Result<()> {
    if priority.is_empty() {
        return Ok(());
    }
    let known: HashSet<&str> = features.iter().map(|f| f.base_name.as_str()).collect();
    let mut ids: Vec<&String> = priority.keys().collect();
    ids.sort();
    for id in ids {
        if !known.contains(id.as_str()) {
            return Err(GodevError::Graph(GraphError::UnknownOverride {
                id: id.clone(),
            }));
        }
    }
    Ok(())
}

fn can_install(feature: &ResolvedFeature, installed: &HashSet<String>) -> bool {
    feature
        .depends_on_keys
        .iter()
        .all(|key| installed.contains(key))
        && feature
            .installs_after_keys
            .iter()
            .filter(|key| !key.is_empty())
            .all(|key| installed.contains(key))
}

/// Deterministic tie-break inside one committed round: base name, tag
/// (semver-aware, `latest` last), more user options first, then user option
/// keys, values, and canonical name.
fn feature_cmp(a: &ResolvedFeature, b: &ResolvedFeature) -> Ordering {
    if a.base_name != b.base_name {
        return a.base_name.cmp(&b.base_name);
    }
    if a.tag != b.tag {
        return compare_feature_tag(&a.tag, &b.tag);
    }
    let a_count = a.options.user_values.len();
    let b_count = b.options.user_values.len();
    if a_count != b_count {
        return b_count.cmp(&a_count);
    }
    let a_keys: Vec<&String> = a.options.user_values.keys().collect();
    let b_keys: Vec<&String> = b.options.user_values.keys().collect();
    match a_keys.cmp(&b_keys) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_values: Vec<&String> = a.options.user_values.values().collect();
    let b_values: Vec<&String> = b.options.user_values.values().collect();
    match a_values.cmp(&b_values) {
        Ordering::Equal => {}
        other => return other,
    }
    a.canonical_name.cmp(&b.canonical_name)
}

/// `latest` sorts after any concrete tag; two parseable versions compare
/// numerically component-wise (missing components count as zero); otherwise
/// plain string comparison.
fn compare_feature_tag(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a == "latest" {
        return Ordering::Greater;
    }
    if b == "latest" {
        return Ordering::Less;
    }
    match (parse_semver(a), parse_semver(b)) {
        (Some(a_parts), Some(b_parts)) => {
            let len = a_parts.len().max(b_parts.len());
            for i in 0..len {
                let a_val = a_parts.get(i).copied().unwrap_or(0);
                let b_val = b_parts.get(i).copied().unwrap_or(0);
                match a_val.cmp(&b_val) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            Ordering::Equal
        }
        _ => a.cmp(b),
    }
}

fn parse_semver(value: &str) -> Option<Vec<u64>> {
    if value.is_empty() {
        return None;
    }
    value
        .split('.')
        .map(|part| {
            if part.is_empty() {
                None
            } else {
                part.parse::<u64>().ok()
            }
        })
        .collect()
}
