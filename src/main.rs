use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    shopforge::logging::init().context("init logging")?;

    let cli = shopforge::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");
    let data_dir = cli.data_dir;

    match cli.command {
        shopforge::cli::Command::Links(args) => {
            shopforge::scrape::run_links(args).await.context("links")?;
        }
        shopforge::cli::Command::Products(args) => {
            shopforge::scrape::run_products(&data_dir, args)
                .await
                .context("products")?;
        }
        shopforge::cli::Command::Config {
            command: shopforge::cli::ConfigCommand::Show,
        } => {
            shopforge::store_config::show(&data_dir)
                .await
                .context("config show")?;
        }
        shopforge::cli::Command::Config {
            command: shopforge::cli::ConfigCommand::Set(args),
        } => {
            shopforge::store_config::set(&data_dir, args)
                .await
                .context("config set")?;
        }
        shopforge::cli::Command::Repos => {
            shopforge::provision::repos().await.context("repos")?;
        }
        shopforge::cli::Command::Connections => {
            shopforge::provision::connections().context("connections")?;
        }
        shopforge::cli::Command::Provision(args) => {
            shopforge::provision::run(&data_dir, args)
                .await
                .context("provision")?;
        }
    }

    Ok(())
}
