//! Backend worker: one upstream search per process.
//!
//! Contract with the server: answer text on stdout and exit 0, or an error
//! description on stderr and exit 1.

use anyhow::{bail, Result};
use serde_json::json;

use crate::core::config::ConfigResolver;
use crate::core::grok::{GrokClient, SearchAnswer};

pub struct SearchOptions {
    pub query: String,
    pub json: bool,
    pub resolver: ConfigResolver,
}

pub async fn run(options: SearchOptions) -> Result<()> {
    match search(&options.resolver, &options.query).await {
        Ok(answer) => {
            if options.json {
                println!("{}", serde_json::to_string(&answer)?);
            } else {
                println!("{}", answer.render_text());
            }
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            if options.json {
                println!("{}", json!({ "ok": false, "error": message }));
            }
            eprintln!("{}", message);
            std::process::exit(1);
        }
    }
}

async fn search(resolver: &ConfigResolver, query: &str) -> Result<SearchAnswer> {
    let query = query.trim();
    if query.is_empty() {
        bail!("query must not be empty");
    }

    let config = resolver.resolve()?;
    let client = GrokClient::new(config)?;
    tracing::debug!(endpoint = %client.endpoint(), "searching");
    Ok(client.search(query).await?)
}
