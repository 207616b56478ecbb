//! Configuration view and setup: `devloop config`.

use anyhow::Result;
use devloop::devloop_config::{DevloopConfig, DevloopToml};
use devloop::llm::{Agent, PromptLibrary};

use super::super::ConfigCommands;

pub fn cmd_config(config: &DevloopConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.paths.config_file;
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file, using defaults");
            }
            println!();
            print!("{}", config.show()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!(
                    "Config file already exists: {} (use --force to overwrite)",
                    config_path.display()
                );
            } else {
                DevloopToml::default().save(config_path)?;
                println!("Created {}", config_path.display());
            }

            config.paths.ensure_directories()?;
            for agent in Agent::ALL {
                let path = config.paths.prompts_dir.join(agent.file_name());
                if path.exists() && !force {
                    continue;
                }
                if let Some(source) = PromptLibrary::builtin_source(agent) {
                    std::fs::write(&path, source)?;
                    println!("Created {}", path.display());
                }
            }
        }
    }
    Ok(())
}
