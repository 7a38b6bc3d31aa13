/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use heimdall_agent::cli::commands;
use heimdall_agent::cli::{parse_cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = parse_cli();

    match cli.command {
        Commands::Start => {
            commands::start().await?;
        }
    }

    Ok(())
}
