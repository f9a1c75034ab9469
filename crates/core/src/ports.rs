//! Port specification handling
//!
//! Port values in devcontainer.json come as numbers, `"port"` strings, or
//! `"host:container"` mappings. They are normalized to the engine's
//! `host:container[/proto]` publish syntax before container creation.

use crate::errors::{ConfigError, GodevError, Result};

/// Normalize one port spec into `host:container[/proto]` form.
///
/// A bare numeric port `N` becomes `N:N`; `N/proto` becomes `N:N/proto`. A
/// spec that already contains `:` is validated (numeric host part) and kept
/// as-is. Anything else is an error.
pub fn normalize_port_spec(spec: &str) -> Result<String> {
    if spec.is_empty() {
        return Err(invalid("empty port spec".to_string()));
    }
    if let Some((host, _rest)) = spec.split_once(':') {
        if !host.is_empty() && host.parse::<u32>().is_err() {
            return Err(invalid(format!("unsupported host in port spec: {}", spec)));
        }
        return Ok(spec.to_string());
    }
    let (port, proto) = match spec.split_once('/') {
        Some((port, proto)) => (port, Some(proto)),
        None => (spec, None),
    };
    if port.parse::<u32>().is_err() {
        return Err(invalid(format!("invalid port spec: {}", spec)));
    }
    match proto {
        Some(proto) => Ok(format!("{}:{}/{}", port, port, proto)),
        None => Ok(format!("{}:{}", port, port)),
    }
}

/// Collect and normalize the port specs from `forwardPorts`, `appPort`, and
/// any extra runtime publishes, preserving input order.
pub fn collect_port_specs(
    forward_ports: &[String],
    app_ports: &[String],
    extra: &[String],
) -> Result<Vec<String>> {
    let mut specs = Vec::with_capacity(forward_ports.len() + app_ports.len() + extra.len());
    for item in forward_ports.iter().chain(app_ports).chain(extra) {
        specs.push(normalize_port_spec(item)?);
    }
    Ok(specs)
}

fn invalid(message: String) -> GodevError {
    GodevError::Config(ConfigError::Validation { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_port() {
        assert_eq!(normalize_port_spec("3000").unwrap(), "3000:3000");
    }

    #[test]
    fn test_normalize_port_with_proto() {
        assert_eq!(normalize_port_spec("3000/tcp").unwrap(), "3000:3000/tcp");
        assert_eq!(normalize_port_spec("53/udp").unwrap(), "53:53/udp");
    }

    #[test]
    fn test_mapping_kept_as_is() {
        assert_eq!(normalize_port_spec("3001:3002").unwrap(), "3001:3002");
    }

    #[test]
    fn test_invalid_specs() {
        assert!(normalize_port_spec("").is_err());
        assert!(normalize_port_spec("web").is_err());
        assert!(normalize_port_spec("host:3000").is_err());
    }

    #[test]
    fn test_collect_port_specs_order() {
        let forward = vec!["3000".to_string(), "3001:3002".to_string()];
        let app = vec!["4000".to_string()];
        let specs = collect_port_specs(&forward, &app, &[]).unwrap();
        assert_eq!(specs, vec!["3000:3000", "3001:3002", "4000:4000"]);
    }
}
