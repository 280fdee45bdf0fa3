use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::core::backend::BackendCommand;
use crate::core::config::{ConfigResolver, EffectiveConfig};
use crate::core::grok::build_endpoint;

pub struct ConfigOptions {
    pub resolver: ConfigResolver,
    pub backend: BackendCommand,
}

pub async fn run(options: ConfigOptions) -> Result<()> {
    println!("{}", "grok-search-mcp configuration".bold());
    println!();

    println!("{}", "Files:".dimmed());
    show_file("config.json", options.resolver.config_path());
    show_file("config.local.json", &options.resolver.local_config_path());

    println!();
    println!("{}", "Environment variables:".dimmed());
    let set_keys = options.resolver.env().set_keys();
    if set_keys.is_empty() {
        println!("  {}", "(none set)".dimmed());
    }
    for key in set_keys {
        println!("  {} set", format!("{}:", key).dimmed());
    }

    println!();
    match options.resolver.resolve() {
        Ok(config) => show_effective(&config),
        Err(e) => {
            println!("{}", "Effective settings:".dimmed());
            println!("  {} {}", "Error:".red().bold(), e.to_string().red());
        }
    }

    println!();
    println!("{}", "Search backend:".dimmed());
    println!("  {} {}", "Command:".dimmed(), options.backend.display());
    match options.backend.resolve_program() {
        Some(path) => println!("  {} {}", "Resolved:".dimmed(), path.display().to_string().green()),
        None => println!("  {} {}", "Resolved:".dimmed(), "not found".yellow()),
    }

    Ok(())
}

fn show_file(label: &str, path: &Path) {
    let status = if path.exists() {
        "found".green()
    } else {
        "missing".yellow()
    };
    println!(
        "  {} {} ({})",
        format!("{}:", label).dimmed(),
        path.display(),
        status
    );
}

fn show_effective(config: &EffectiveConfig) {
    println!("{}", "Effective settings:".dimmed());
    println!("  {} {}", "Base URL:".dimmed(), config.base_url);
    println!("  {} {}", "Endpoint:".dimmed(), build_endpoint(&config.base_url));
    println!("  {} {}", "API Key:".dimmed(), config.masked_api_key());
    println!("  {} {}", "Model:".dimmed(), config.model);
    println!("  {} {}s", "Timeout:".dimmed(), config.timeout_seconds);

    match &config.system_prompt {
        Some(prompt) => println!("  {} {}", "System prompt:".dimmed(), prompt),
        None => println!("  {} {}", "System prompt:".dimmed(), "(default)".dimmed()),
    }
    if !config.extra_body.is_empty() {
        let keys: Vec<&str> = config.extra_body.keys().map(String::as_str).collect();
        println!("  {} {}", "Extra body keys:".dimmed(), keys.join(", "));
    }
    if !config.extra_headers.is_empty() {
        let keys: Vec<&str> = config.extra_headers.keys().map(String::as_str).collect();
        println!("  {} {}", "Extra headers:".dimmed(), keys.join(", "));
    }
}
