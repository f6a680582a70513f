mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{AccountCommands, Cli, Commands, MerchantCommands, RuleCommands};
use commands::{App, ImportOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::open(cli.db.as_deref(), cli.config.as_deref()).await?;

    match cli.command {
        Commands::Analyze { file, user, detect } => {
            commands::analyze(&app, &file, user, detect.into()).await?
        }
        Commands::Import {
            file,
            user,
            account,
            currency,
            default_currency,
            save_mapping,
            tag,
            json,
            detect,
        } => {
            commands::import(
                &app,
                ImportOptions {
                    file,
                    user,
                    account,
                    currency,
                    default_currency,
                    save_mapping,
                    tag,
                    json,
                    detect: detect.into(),
                },
            )
            .await?
        }
        Commands::Account { command } => match command {
            AccountCommands::Add { user, name, currency } => {
                commands::account_add(&app, user, &name, currency.as_deref()).await?
            }
        },
        Commands::Rule { command } => match command {
            RuleCommands::Add {
                user,
                pattern,
                name,
                category,
                priority,
                recurring,
            } => commands::rule_add(&app, user, &pattern, &name, category, priority, recurring).await?,
        },
        Commands::Merchant { command } => match command {
            MerchantCommands::Add {
                pattern,
                name,
                category,
                user,
                recurring,
            } => commands::merchant_add(&app, &pattern, &name, category, user, recurring).await?,
        },
        Commands::Suggest {
            query,
            user,
            mode,
            fuzziness,
            limit,
        } => commands::suggest(&app, query, user, mode, fuzziness, limit).await?,
        Commands::Cluster {
            file,
            threshold,
            detect,
        } => commands::cluster(&app, &file, threshold, detect.into()).await?,
    }
    Ok(())
}
