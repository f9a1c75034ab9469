//! Raw engine run-argument parsing
//!
//! `runArgs` entries from the configuration (and runtime extras) are parsed
//! against a whitelist of flags the orchestrator can express on a container
//! spec. Anything else is an error rather than being passed through blindly.

use crate::errors::{ConfigError, GodevError, Result};
use std::collections::BTreeMap;

/// Structured view of the supported run arguments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunArgOptions {
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub privileged: bool,
    pub init: bool,
    pub user: Option<String>,
    pub network: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Parse run arguments. Supported: `--cap-add`, `--security-opt`,
/// `--privileged`, `--init`, `--user`/`-u`, `--network`, `--label`/`-l`,
/// each in both `--flag value` and `--flag=value` forms where applicable.
pub fn parse_run_args(args: &[String]) -> Result<RunArgOptions> {
    let mut opts = RunArgOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            a if a.starts_with("--cap-add=") => {
                opts.cap_add.push(a["--cap-add=".len()..].to_string());
            }
            "--cap-add" => opts.cap_add.push(next_value(&mut iter, arg)?),
            a if a.starts_with("--security-opt=") => {
                opts.security_opt
                    .push(a["--security-opt=".len()..].to_string());
            }
            "--security-opt" => opts.security_opt.push(next_value(&mut iter, arg)?),
            "--privileged" => opts.privileged = true,
            "--init" => opts.init = true,
            a if a.starts_with("--user=") => {
                opts.user = Some(a["--user=".len()..].to_string());
            }
            "--user" | "-u" => opts.user = Some(next_value(&mut iter, arg)?),
            a if a.starts_with("--network=") => {
                opts.network = Some(a["--network=".len()..].to_string());
            }
            "--network" => opts.network = Some(next_value(&mut iter, arg)?),
            a if a.starts_with("--label=") => {
                apply_label(&mut opts, &a["--label=".len()..])?;
            }
            "--label" | "-l" => {
                let value = next_value(&mut iter, arg)?;
                apply_label(&mut opts, &value)?;
            }
            other => {
                return Err(GodevError::Config(ConfigError::Validation {
                    message: format!("unsupported runArg: {}", other),
                }));
            }
        }
    }
    Ok(opts)
}

fn next_value<'a, I>(iter: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = &'a String>,
{
    iter.next().cloned().ok_or_else(|| {
        GodevError::Config(ConfigError::Validation {
            message: format!("missing value for {}", flag),
        })
    })
}

fn apply_label(opts: &mut RunArgOptions, value: &str) -> Result<()> {
    let Some((key, label_value)) = value.split_once('=') else {
        return Err(GodevError::Config(ConfigError::Validation {
            message: format!("invalid label: {}", value),
        }));
    };
    if key.is_empty() {
        return Err(GodevError::Config(ConfigError::Validation {
            message: format!("invalid label: {}", value),
        }));
    }
    opts.labels.insert(key.to_string(), label_value.to_string());
    Ok(())
}
