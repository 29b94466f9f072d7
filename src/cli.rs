use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding `store.json` and the product catalog.
    #[arg(long, global = true, default_value = "shopforge-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover product detail links on a catalog page.
    Links(LinksArgs),
    /// Extract products and save them to the catalog.
    Products(ProductsArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// List repositories of the connected source-control account.
    Repos,
    /// Show which provider tokens are configured.
    Connections,
    /// Create repository, push, create hosting project, deploy and alias.
    Provision(ProvisionArgs),
}

#[derive(Debug, Args)]
pub struct LinksArgs {
    /// Catalog page URL (must be http/https).
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct ProductsArgs {
    /// Product detail URL; repeat for several.
    #[arg(long = "link")]
    pub links: Vec<String>,

    /// Catalog page to discover links on when no `--link` is given.
    #[arg(long)]
    pub url: Option<String>,

    /// Maximum concurrent extractions (default: derived from host cores/memory).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-product extraction timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the current store configuration.
    Show,
    /// Update fields of the store configuration.
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub currency: Option<String>,

    #[arg(long)]
    pub currency_sign: Option<String>,

    #[arg(long)]
    pub domain: Option<String>,

    /// Explicit database name; otherwise derived from the store name and today.
    #[arg(long)]
    pub database: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Storefront working tree to publish.
    #[arg(long)]
    pub tree: PathBuf,

    /// Environment file synced to the hosting project (default: `<tree>/.env.local`).
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Create the repository as private.
    #[arg(long, default_value_t = false)]
    pub private: bool,
}
