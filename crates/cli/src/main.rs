//! Simone Sixx CLI - operations on a running shop.
//!
//! # Usage
//!
//! ```bash
//! # Send pending article announcements (cron)
//! simone-cli newsletter drain --base-url https://simonesixx.com --token "$NEWSLETTER_NOTIFY_TOKEN"
//!
//! # Inspect and adjust stock
//! simone-cli inventory show
//! simone-cli inventory set-stock price_1T4LB60XZVE1puxSTKgblJPz 6 --label "Parfum 30 ml"
//! simone-cli inventory release-expired
//! simone-cli inventory cancel res_8f14e45fceea167a
//!
//! # Price a parcel
//! simone-cli shipping quote --weight 350 --country BE --method home
//! ```
//!
//! # Commands
//!
//! - `newsletter drain` - Call the notify endpoint until each recent article is sent
//! - `inventory` - Stock ledger in `STOREFRONT_DATA_DIR`
//! - `shipping quote` - Shipping charge from the shop settings

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use secrecy::SecretString;

mod commands;

#[derive(Parser)]
#[command(name = "simone-cli")]
#[command(author, version, about = "Simone Sixx storefront CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Newsletter sending
    Newsletter {
        #[command(subcommand)]
        action: NewsletterAction,
    },
    /// Manage the stock ledger
    Inventory {
        /// Shop settings JSON (defaults to `STOREFRONT_SHOP_CONFIG`, then built-in settings)
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        /// Data directory (defaults to `STOREFRONT_DATA_DIR`, then `data`)
        #[arg(long, global = true)]
        data_dir: Option<PathBuf>,

        #[command(subcommand)]
        action: InventoryAction,
    },
    /// Shipping rates
    Shipping {
        #[command(subcommand)]
        action: ShippingAction,
    },
}

#[derive(Subcommand)]
enum NewsletterAction {
    /// Announce the most recent articles, one batch per step
    Drain {
        /// Public site URL, e.g. `https://simonesixx.com`
        #[arg(long)]
        base_url: Option<String>,

        /// Notify token (defaults to `NEWSLETTER_NOTIFY_TOKEN`)
        #[arg(long)]
        token: Option<String>,

        /// Articles JSON (defaults to the published catalog)
        #[arg(long)]
        articles: Option<PathBuf>,

        /// How many of the newest articles to consider (1-10)
        #[arg(long, default_value_t = 3)]
        max_articles: usize,

        /// Notify calls per article (1-25)
        #[arg(long, default_value_t = 1)]
        max_steps: usize,

        /// Restart finished jobs from scratch
        #[arg(long)]
        force: bool,

        /// Count recipients without sending
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum InventoryAction {
    /// Show stock, sold units and pending reservations
    Show,
    /// Set the stock of an item
    SetStock {
        /// Provider price id
        price_id: String,
        /// Units in stock
        stock: u32,
        /// Name shown in stock errors
        #[arg(long)]
        label: Option<String>,
    },
    /// Release reservations whose hold has expired
    ReleaseExpired,
    /// Release one reservation
    Cancel {
        /// Reservation id
        reservation_id: String,
    },
}

#[derive(Subcommand)]
enum ShippingAction {
    /// Quote shipping for a parcel
    Quote {
        /// Packed weight in grams
        #[arg(long)]
        weight: u32,
        /// Destination country code
        #[arg(long, default_value = "FR")]
        country: String,
        /// `home` or `mondial_relay`
        #[arg(long, default_value = "home")]
        method: String,
        /// Products subtotal, for free shipping
        #[arg(long)]
        subtotal_cents: Option<i64>,
        /// Shop settings JSON (defaults to `STOREFRONT_SHOP_CONFIG`, then built-in settings)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simone_cli=info,simone_storefront=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Newsletter { action } => match action {
            NewsletterAction::Drain {
                base_url,
                token,
                articles,
                max_articles,
                max_steps,
                force,
                dry_run,
            } => {
                let base_url = base_url
                    .or_else(|| env_value("NEWSLETTER_SITE_BASE_URL"))
                    .or_else(|| env_value("STOREFRONT_BASE_URL"))
                    .ok_or("Missing site base URL (--base-url or NEWSLETTER_SITE_BASE_URL)")?;
                let token = token
                    .or_else(|| env_value("NEWSLETTER_NOTIFY_TOKEN"))
                    .map(SecretString::from)
                    .ok_or("Missing notify token (--token or NEWSLETTER_NOTIFY_TOKEN)")?;
                let articles = match articles {
                    Some(path) => commands::newsletter::articles_from_file(&path).await?,
                    None => commands::newsletter::published_articles().await,
                };

                let options = commands::newsletter::DrainOptions {
                    max_articles,
                    max_steps,
                    force,
                    dry_run,
                };
                commands::newsletter::drain(&base_url, &token, &articles, &options).await?;
            }
        },
        Commands::Inventory {
            config,
            data_dir,
            action,
        } => {
            let inventory = commands::inventory::open(config.as_deref(), data_dir)?;
            match action {
                InventoryAction::Show => commands::inventory::show(&inventory).await?,
                InventoryAction::SetStock {
                    price_id,
                    stock,
                    label,
                } => commands::inventory::set_stock(&inventory, &price_id, stock, label).await?,
                InventoryAction::ReleaseExpired => {
                    commands::inventory::release_expired(&inventory).await?;
                }
                InventoryAction::Cancel { reservation_id } => {
                    commands::inventory::cancel(&inventory, &reservation_id).await?;
                }
            }
        }
        Commands::Shipping { action } => match action {
            ShippingAction::Quote {
                weight,
                country,
                method,
                subtotal_cents,
                config,
            } => {
                let settings = commands::load_settings(config.as_deref())?;
                commands::shipping::quote(&settings, weight, &country, &method, subtotal_cents)?;
            }
        },
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
