//! Command-line interface definition and dispatch

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use godev_core::docker::DockerCli;
use godev_core::mount::parse_mount_string;
use godev_core::oci::FeatureFetcher;
use godev_core::start::{
    build_image_from_devcontainer, remove_devcontainer, start_devcontainer, stop_devcontainer,
    ResourceLimits, StartOptions,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "godev",
    about = "Reproducible development containers",
    version
)]
pub struct Cli {
    /// Log format (text or json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a devcontainer and run its lifecycle hooks
    Up {
        /// Path to devcontainer.json (discovered from the current directory
        /// when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Extra environment variables (KEY=VALUE, repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Extra port publishes (HOST:CONTAINER, repeatable)
        #[arg(long = "publish", value_name = "SPEC")]
        publish: Vec<String>,

        /// Extra mounts (key=value syntax, repeatable)
        #[arg(long = "mount", value_name = "SPEC")]
        mount: Vec<String>,

        /// Extra docker run arguments (repeatable)
        #[arg(long = "run-arg", value_name = "ARG")]
        run_arg: Vec<String>,

        /// Extra container labels (KEY=VALUE, repeatable)
        #[arg(long = "label", value_name = "KEY=VALUE")]
        label: Vec<String>,

        /// Container network mode
        #[arg(long)]
        network: Option<String>,

        /// Working directory override
        #[arg(long)]
        workdir: Option<String>,

        /// CPU quota (microseconds per period)
        #[arg(long)]
        cpu_quota: Option<i64>,

        /// Memory limit (e.g. 512m, 2g)
        #[arg(long)]
        memory: Option<String>,

        /// Wait for the container to exit instead of detaching
        #[arg(long)]
        no_detach: bool,

        /// Remove the container when it stops
        #[arg(long)]
        remove_on_stop: bool,

        /// Overall start deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Build the devcontainer image (including the features image) without
    /// starting a container
    Build {
        /// Path to devcontainer.json
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Stop a running devcontainer
    Stop {
        /// Container id
        container_id: String,

        /// Stop grace period in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Remove a devcontainer (compose projects are torn down)
    Down {
        /// Container id
        container_id: String,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let engine = DockerCli::new();
        let fetcher = FeatureFetcher::new()?;
        match self.command {
            Commands::Up {
                config,
                env,
                publish,
                mount,
                run_arg,
                label,
                network,
                workdir,
                cpu_quota,
                memory,
                no_detach,
                remove_on_stop,
                timeout,
            } => {
                let mut options = StartOptions {
                    config_path: config,
                    extra_publish: publish,
                    run_args: run_arg,
                    remove_on_stop,
                    detach: !no_detach,
                    network,
                    workdir,
                    resources: ResourceLimits { cpu_quota, memory },
                    timeout: timeout.map(Duration::from_secs),
                    ..StartOptions::default()
                };
                for entry in env {
                    let (key, value) = split_key_value(&entry, "--env")?;
                    options.env.insert(key, value);
                }
                for entry in label {
                    let (key, value) = split_key_value(&entry, "--label")?;
                    options.labels.insert(key, value);
                }
                for spec in mount {
                    options.extra_mounts.push(parse_mount_string(&spec)?);
                }

                match start_devcontainer(&engine, &fetcher, options).await {
                    Ok(container_id) => {
                        println!("{}", container_id);
                        Ok(())
                    }
                    Err(err) => {
                        if let Some(container_id) = &err.container_id {
                            eprintln!("container created before failure: {}", container_id);
                        }
                        Err(anyhow!(err))
                    }
                }
            }
            Commands::Build { config } => {
                let config = config.unwrap_or_else(|| {
                    PathBuf::from(".devcontainer").join("devcontainer.json")
                });
                let image = build_image_from_devcontainer(&engine, &fetcher, &config).await?;
                println!("{}", image);
                Ok(())
            }
            Commands::Stop {
                container_id,
                timeout,
            } => {
                stop_devcontainer(&engine, &container_id, timeout.map(Duration::from_secs))
                    .await?;
                Ok(())
            }
            Commands::Down { container_id } => {
                remove_devcontainer(&engine, &container_id).await?;
                Ok(())
            }
        }
    }
}

fn split_key_value(entry: &str, flag: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(anyhow!("invalid {} value: {}", flag, entry)),
    }
}
