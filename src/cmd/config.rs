//! Configuration view and validation commands: `waypoint config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use waypoint::config::PIPELINE_DIR;
    use waypoint::pipeline_config::{CONFIG_FILE, WaypointToml};

    let pipeline_dir = project_dir.join(PIPELINE_DIR);
    let config_path = pipeline_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Waypoint Configuration");
            println!("======================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                WaypointToml::load(&config_path)?
            } else {
                println!("No waypoint.toml found at {}", config_path.display());
                println!("Using default configuration.");
                WaypointToml::default()
            };
            println!();
            print!("{}", toml.to_toml_string()?);
            println!();

            // Effective values include environment overrides
            toml.apply_env();
            println!("Effective values (with env overrides):");
            println!("  claude_cmd = \"{}\"", toml.claude_cmd());
            println!("  skip_permissions = {}", toml.agent.skip_permissions);
            println!("  model = \"{}\"", toml.defaults.model);
            match toml.notify.topic {
                Some(ref topic) if toml.notify.enabled => {
                    println!("  notify = \"{}/{}\"", toml.notify.server, topic)
                }
                _ => println!("  notify = disabled"),
            }
            println!();

            if !config_path.exists() {
                println!("Run 'waypoint config init' to create a waypoint.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No waypoint.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = WaypointToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("waypoint.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            WaypointToml::default().save(&config_path)?;

            println!("Created waypoint.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [defaults] model, max_retries");
            println!("  - [agent] claude_cmd, timeout_secs, session_continuity");
            println!("  - [notify] enabled, server, topic");
            println!("  - [git] auto_commit, push, remote");
            println!();
        }
    }

    Ok(())
}
