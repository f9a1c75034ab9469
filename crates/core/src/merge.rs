//! Configuration overlay merge
//!
//! Produces a fresh configuration from a base and an overlay without
//! mutating either input. Scalars: overlay wins when set. Maps: overlay keys
//! overwrite. Slices: concatenation, base first. Features: key union with
//! the inner option maps merged key-by-key. Lifecycle hooks: whole-value
//! overwrite when the overlay sets one.

use crate::config::{DevcontainerBuild, DevcontainerConfig};
use crate::features::FeatureSet;
use std::collections::HashMap;

/// Overlay-merge two configurations into a new value.
pub fn merge_config(base: &DevcontainerConfig, overlay: &DevcontainerConfig) -> DevcontainerConfig {
    let mut merged = base.clone();

    merge_scalar(&mut merged.name, &overlay.name);
    merge_scalar(&mut merged.image, &overlay.image);
    merged.build = merge_build(base.build.as_ref(), overlay.build.as_ref());
    merged
        .docker_compose_file
        .extend(overlay.docker_compose_file.iter().cloned());
    merge_scalar(&mut merged.service, &overlay.service);
    merged.run_services.extend(overlay.run_services.iter().cloned());
    merge_scalar(&mut merged.shutdown_action, &overlay.shutdown_action);
    merged.forward_ports.extend(overlay.forward_ports.iter().cloned());
    merged.app_port.extend(overlay.app_port.iter().cloned());
    merge_string_map(&mut merged.container_env, &overlay.container_env);
    merged.mounts.extend(overlay.mounts.iter().cloned());
    merge_scalar(&mut merged.workspace_mount, &overlay.workspace_mount);
    merge_scalar(&mut merged.workspace_folder, &overlay.workspace_folder);
    merged.run_args.extend(overlay.run_args.iter().cloned());
    merged.privileged = merged.privileged || overlay.privileged;
    merged.cap_add.extend(overlay.cap_add.iter().cloned());
    merged.security_opt.extend(overlay.security_opt.iter().cloned());
    merged.init = merge_init(base.init, overlay.init);
    merge_scalar(&mut merged.container_user, &overlay.container_user);
    merge_scalar(&mut merged.remote_user, &overlay.remote_user);
    merge_string_map(&mut merged.remote_env, &overlay.remote_env);
    merged.features = merge_feature_set(&base.features, &overlay.features);
    merged
        .override_feature_install_order
        .extend(overlay.override_feature_install_order.iter().cloned());
    if overlay.override_command.is_some() {
        merged.override_command = overlay.override_command;
    }

    merge_hook(&mut merged.initialize_command, &overlay.initialize_command);
    merge_hook(&mut merged.on_create_command, &overlay.on_create_command);
    merge_hook(
        &mut merged.update_content_command,
        &overlay.update_content_command,
    );
    merge_hook(&mut merged.post_create_command, &overlay.post_create_command);
    merge_hook(&mut merged.post_start_command, &overlay.post_start_command);
    merge_hook(&mut merged.post_attach_command, &overlay.post_attach_command);

    merged
}

fn merge_scalar(target: &mut Option<String>, overlay: &Option<String>) {
    if let Some(value) = overlay {
        if !value.is_empty() {
            *target = Some(value.clone());
        }
    }
}

fn merge_string_map(target: &mut HashMap<String, String>, overlay: &HashMap<String, String>) {
    for (key, value) in overlay {
        target.insert(key.clone(), value.clone());
    }
}

/// Both unset stays unset; otherwise the results OR together.
fn merge_init(base: Option<bool>, overlay: Option<bool>) -> Option<bool> {
    match (base, overlay) {
        (None, None) => None,
        _ => Some(base.unwrap_or(false) || overlay.unwrap_or(false)),
    }
}

fn merge_hook<T: Clone>(target: &mut Option<T>, overlay: &Option<T>) {
    if let Some(value) = overlay {
        *target = Some(value.clone());
    }
}

fn merge_build(
    base: Option<&DevcontainerBuild>,
    overlay: Option<&DevcontainerBuild>,
) -> Option<DevcontainerBuild> {
    match (base, overlay) {
        (None, None) => None,
        (Some(base), None) => Some(base.clone()),
        (None, Some(overlay)) => Some(overlay.clone()),
        (Some(base), Some(overlay)) => {
            let mut merged = base.clone();
            merge_scalar(&mut merged.dockerfile, &overlay.dockerfile);
            merge_scalar(&mut merged.context, &overlay.context);
            merge_string_map(&mut merged.args, &overlay.args);
            merged.cache_from.extend(overlay.cache_from.iter().cloned());
            merged.options.extend(overlay.options.iter().cloned());
            merge_scalar(&mut merged.target, &overlay.target);
            Some(merged)
        }
    }
}

/// Union of feature keys; colliding entries merge their option maps with the
/// overlay's values winning.
fn merge_feature_set(base: &FeatureSet, overlay: &FeatureSet) -> FeatureSet {
    let mut merged = base.clone();
    for (key, options) in overlay {
        let entry = merged.entry(key.clone()).or_default();
        for (opt_key, value) in options {
            entry.insert(opt_key.clone(), value.clone());
        }
    }
    merged
}
