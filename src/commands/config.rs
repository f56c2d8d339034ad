use anyhow::Result;
use tracing::info;

use super::load_config;
use crate::cli::ConfigCommands;
use crate::config::ActionKeyConfig;

pub fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Generate => generate(),
        ConfigCommands::Show { common } => {
            let config = load_config(&common)?;
            info!("Showing effective configuration");
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = ActionKeyConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!("  - Exec root: {}", config.exec.exec_root);
    println!("  - Test logs: {}", config.exec.testlogs_dir);
    println!(
        "  - Cache: {} ({})",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache_dir().display()
    );
    if let Some(platform) = &config.execution.platform {
        println!("  - Execution platform: {}", platform);
    }
    println!(
        "  - Client env allowlist: {}",
        config.client_env.allowlist.join(", ")
    );

    Ok(())
}

fn generate() -> Result<()> {
    println!("{}", ActionKeyConfig::example()?);
    Ok(())
}
