mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dishlens::config;

#[derive(Parser)]
#[command(name = "dishlens", version, about = "See what the dishes on a menu look like")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every dish on a menu photo to reference images and ingredients
    Resolve {
        /// Menu photo (jpg, png, gif or webp)
        image: PathBuf,
        /// Number of reference images per dish
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rank the catalog against a single dish name, without any network call
    Search {
        /// Dish name, in English
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Check the catalog, model files and API key
    Doctor,
    /// Build or query the reference dish catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Embed reference photos into a catalog file
    Build {
        /// Directory laid out as <cuisine>/<dish>.jpg, or a scraper manifest (.json)
        input: PathBuf,
        /// Where to write the catalog (defaults to the configured catalog path)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Scraper manifest supplying source URLs in directory mode
        #[arg(long)]
        scraped_json: Option<PathBuf>,
    },
    /// Rank the catalog against a photo
    Similar {
        image: PathBuf,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the CLIP text model to ~/.dishlens/models/
    Download {
        /// Also fetch the image model used by `catalog build`
        #[arg(long)]
        vision: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let mut config = config::DishlensConfig::load()?;

    // Log to stderr so stdout stays clean for results.
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Resolve { image, top_k, json } => {
            if let Some(k) = top_k {
                config.retrieval.top_k = k;
            }
            cli::resolve::resolve(&config, &image, json).await?;
        }
        Command::Search { text, top_k } => {
            if let Some(k) = top_k {
                config.retrieval.top_k = k;
            }
            cli::search::search(&config, &text).await?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
        Command::Catalog { action } => match action {
            CatalogAction::Build {
                input,
                output,
                scraped_json,
            } => {
                cli::catalog::build(&config, &input, output, scraped_json).await?;
            }
            CatalogAction::Similar { image, top_k } => {
                if let Some(k) = top_k {
                    config.retrieval.top_k = k;
                }
                cli::catalog::similar(&config, &image).await?;
            }
        },
        Command::Model { action } => match action {
            ModelAction::Download { vision } => {
                cli::model_download(&config.embedding, vision).await?;
            }
        },
    }

    Ok(())
}
