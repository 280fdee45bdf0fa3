use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod commands;
mod core;
mod mcp;

use commands::{config, search, serve};
use crate::core::backend::BackendCommand;
use crate::core::config::{expand_home, ConfigOverrides, ConfigResolver, EnvSnapshot};

#[derive(Parser)]
#[command(name = "grok-search-mcp")]
#[command(about = "MCP server exposing Grok real-time search as a tool")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP endpoint (default when no command is given)
    Serve(ServeArgs),

    /// Run a single search against the upstream provider.
    ///
    /// This is the worker the server spawns for every `tools/call`.
    Search {
        /// Search query / research task
        #[arg(short, long, allow_hyphen_values = true)]
        query: String,

        /// Print the structured JSON payload instead of plain text
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        config: ConfigFlags,
    },

    /// Show the effective configuration
    #[command(alias = "c")]
    Config {
        #[command(flatten)]
        backend: BackendFlags,

        #[command(flatten)]
        config: ConfigFlags,
    },
}

#[derive(Args, Clone, Debug)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "GROK_MCP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(short, long, env = "GROK_MCP_PORT", default_value = "5678")]
    port: u16,

    /// Speak line-delimited JSON-RPC on stdin/stdout instead of HTTP
    #[arg(long)]
    stdio: bool,

    #[command(flatten)]
    backend: BackendFlags,

    #[command(flatten)]
    config: ConfigFlags,
}

#[derive(Args, Clone, Debug)]
struct BackendFlags {
    /// Search backend executable (defaults to this binary's `search` command)
    #[arg(long, value_name = "PROGRAM")]
    backend: Option<String>,

    /// Extra argument passed to the backend before `--query` (repeatable)
    #[arg(long = "backend-arg", value_name = "ARG", allow_hyphen_values = true)]
    backend_args: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct ConfigFlags {
    /// Path to config.json; config.local.json is read from the same directory
    #[arg(long, value_name = "PATH", default_value = "config.json")]
    config: String,

    /// Override the Grok base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the Grok API key
    #[arg(long)]
    api_key: Option<String>,

    /// Override the model name
    #[arg(long)]
    model: Option<String>,

    /// Override the search timeout in seconds
    #[arg(long = "timeout-seconds", alias = "timeout", value_name = "SECONDS")]
    timeout_seconds: Option<String>,

    /// Override the system prompt
    #[arg(long)]
    system_prompt: Option<String>,

    /// Extra JSON object merged into the upstream request body
    #[arg(long, value_name = "JSON")]
    extra_body_json: Option<String>,

    /// Extra JSON object of HTTP headers for the upstream request
    #[arg(long, value_name = "JSON")]
    extra_headers_json: Option<String>,
}

impl ConfigFlags {
    fn into_resolver(self) -> ConfigResolver {
        ConfigResolver::new(
            expand_home(&self.config),
            EnvSnapshot::capture(),
            ConfigOverrides {
                base_url: self.base_url,
                api_key: self.api_key,
                model: self.model,
                timeout_seconds: self.timeout_seconds,
                system_prompt: self.system_prompt,
                extra_body_json: self.extra_body_json,
                extra_headers_json: self.extra_headers_json,
            },
        )
    }
}

impl BackendFlags {
    /// The configured program, or this executable's `search` command pointed
    /// at the same config file.
    fn into_command(self, resolver: &ConfigResolver) -> Result<BackendCommand> {
        let command = match self.backend {
            Some(program) => BackendCommand::new(expand_home(&program)),
            None => BackendCommand::current_exe()?
                .arg("--config")
                .arg(OsString::from(resolver.config_path())),
        };
        Ok(self
            .backend_args
            .into_iter()
            .fold(command, |command, arg| command.arg(arg)))
    }
}

fn init_logging(env_var: &str, default_filter: &str) {
    let filter =
        EnvFilter::try_from_env(env_var).unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    init_logging("RUST_LOG", "info");

    let resolver = args.config.into_resolver();
    let backend = args.backend.into_command(&resolver)?;
    serve::run(serve::ServeOptions {
        host: args.host,
        port: args.port,
        stdio: args.stdio,
        resolver,
        backend,
    })
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args).await?,
        Some(Commands::Search {
            query,
            json,
            config: flags,
        }) => {
            // stderr is the error channel back to the server, keep it quiet.
            init_logging("GROK_SEARCH_LOG", "off");
            search::run(search::SearchOptions {
                query,
                json,
                resolver: flags.into_resolver(),
            })
            .await?;
        }
        Some(Commands::Config {
            backend,
            config: flags,
        }) => {
            init_logging("RUST_LOG", "warn");
            let resolver = flags.into_resolver();
            let backend = backend.into_command(&resolver)?;
            config::run(config::ConfigOptions { resolver, backend }).await?;
        }
        None => run_serve(cli.serve).await?,
    }

    Ok(())
}
