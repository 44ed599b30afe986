use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::TesseraConfig;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::browse::{DataSource, ItemsArgs};

#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Browse PostgreSQL schemas as one set of collections")]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, env = "TESSERA_CONFIG", default_value = "tessera.yaml")]
    config: PathBuf,

    /// Browse the built-in sample dataset instead of the upstream database
    #[arg(long, global = true)]
    sample: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the schema naming rules.
    Check,

    /// List the visible schemas and the prefix of their collections.
    Namespaces,

    /// List every published collection.
    Collections,

    /// Print the structure of one collection.
    Describe {
        /// Published collection id, e.g. "alt:locations"
        id: String,
    },

    /// Query the records of a collection.
    Items(ItemsArgs),

    /// Fetch one record by id.
    Get {
        /// Published collection id
        id: String,
        /// Record id
        record_id: String,
    },
}

/// `RUST_LOG` wins over the configured filter, which wins over `info`.
fn init_logging(config: Option<&TesseraConfig>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .map(|c| c.logging.filter.as_str())
                .unwrap_or("info"),
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = TesseraConfig::from_file(&cli.config);
    init_logging(loaded.as_ref().ok());

    let data = if cli.sample {
        DataSource::Sample
    } else {
        DataSource::Postgres
    };
    let browse = |loaded| commands::browse_config(&cli.config, loaded, data);

    match cli.cmd {
        Command::Check => commands::check::run(&cli.config, loaded)?,
        Command::Namespaces => commands::browse::namespaces(&browse(loaded)?, data).await?,
        Command::Collections => commands::browse::collections(&browse(loaded)?, data).await?,
        Command::Describe { id } => commands::browse::describe(&browse(loaded)?, data, &id).await?,
        Command::Items(args) => commands::browse::items(&browse(loaded)?, data, &args).await?,
        Command::Get { id, record_id } => {
            commands::browse::get(&browse(loaded)?, data, &id, &record_id).await?
        }
    }

    Ok(())
}
