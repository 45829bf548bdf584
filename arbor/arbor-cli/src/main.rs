//! Arbor CLI - Command-line interface for the Arbor node tree.
//!
//! # Usage
//!
//! ```bash
//! # Provision a home and create a folder in it
//! arbor --root /var/tmp/arbor home create --id 42 --idp https://idp.example.org
//! arbor mkdir -p /42/docs/reports
//!
//! # Inspect the tree
//! arbor ls /42 --md '*'
//! arbor stat id:<node id>/reports
//!
//! # Reorganize
//! arbor mv /42/docs/reports /42/reports
//! arbor rm /42/docs
//! ```

use anyhow::Result;
use arbor_cli::{PrincipalArgs, commands, output, OutputFormat};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Arbor - Tree-structured node storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage root, overriding the configuration
    #[arg(long, global = true, env = "ARBOR_ROOT")]
    root: Option<PathBuf>,

    /// Output format (human, json)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a directory
    Mkdir {
        path: String,

        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,
    },

    /// Create an empty file node
    Touch { path: String },

    /// Move or rename a node
    Mv { from: String, to: String },

    /// Delete a node, keeping it recoverable in the trash
    Rm { target: String },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        target: String,

        /// Arbitrary metadata keys to include (`*` for all)
        #[arg(long, value_delimiter = ',')]
        md: Vec<String>,
    },

    /// Show one node
    Stat {
        target: String,

        /// Arbitrary metadata keys to include (`*` for all)
        #[arg(long, value_delimiter = ',')]
        md: Vec<String>,
    },

    /// Print the current path of a node id
    Path { id: String },

    /// Create a reference in the share folder
    Ref { path: String, target: String },

    /// Home directory management
    #[command(subcommand)]
    Home(HomeCommands),

    /// Set arbitrary metadata as key=value pairs
    SetMd {
        target: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Remove arbitrary metadata keys
    UnsetMd {
        target: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List trashed nodes
    Trash,

    /// Verify the tree structure
    Fsck,
}

#[derive(Subcommand)]
enum HomeCommands {
    /// Provision the home of a principal
    Create(PrincipalFlags),

    /// Print where the home of a principal lives
    Path(PrincipalFlags),
}

#[derive(Args)]
struct PrincipalFlags {
    /// Opaque principal id
    #[arg(long)]
    id: String,

    /// Identity provider
    #[arg(long, default_value = "")]
    idp: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    mail: Option<String>,

    #[arg(long)]
    display_name: Option<String>,
}

impl From<PrincipalFlags> for PrincipalArgs {
    fn from(flags: PrincipalFlags) -> Self {
        Self {
            id: flags.id,
            idp: flags.idp,
            username: flags.username,
            mail: flags.mail,
            display_name: flags.display_name,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let format: OutputFormat = cli.format.into();
    let config = commands::load_config(cli.config.as_deref(), cli.root).await?;
    let engine = commands::open_engine(config).await?;

    let result = match cli.command {
        Commands::Mkdir { path, parents } => {
            commands::make_dir(&engine, &path, parents, format).await
        }
        Commands::Touch { path } => commands::touch(&engine, &path, format).await,
        Commands::Mv { from, to } => commands::move_node(&engine, &from, &to, format).await,
        Commands::Rm { target } => commands::remove(&engine, &target, format).await,
        Commands::Ls { target, md } => commands::list(&engine, &target, &md, format).await,
        Commands::Stat { target, md } => commands::stat(&engine, &target, &md, format).await,
        Commands::Path { id } => commands::path_of(&engine, &id, format),
        Commands::Ref { path, target } => {
            commands::create_reference(&engine, &path, &target, format).await
        }
        Commands::Home(HomeCommands::Create(flags)) => {
            commands::create_home(&engine, flags.into(), format).await
        }
        Commands::Home(HomeCommands::Path(flags)) => {
            commands::home_path(&engine, flags.into(), format)
        }
        Commands::SetMd { target, pairs } => commands::set_metadata(&engine, &target, &pairs).await,
        Commands::UnsetMd { target, keys } => {
            commands::unset_metadata(&engine, &target, &keys).await
        }
        Commands::Trash => commands::list_trash(&engine, format),
        Commands::Fsck => commands::check(&engine, format),
    };

    engine.shutdown().await?;
    result
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("arbor=debug,arbor_tree=debug,arbor_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("arbor_tree=info,arbor_cli=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
