mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{member::MemberSubcommand, team::TeamSubcommand, user::UserSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "teamsync",
    about = "Keep team, member and answer state in sync between a store and its clients",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest directory with teamsync.yaml, else cwd)
    #[arg(long, global = true, env = "TEAMSYNC_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP/SSE API
    Serve {
        /// Port to listen on (default: server.port from teamsync.yaml)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage teams
    Team {
        #[command(subcommand)]
        subcommand: TeamSubcommand,
    },

    /// Add or remove team members
    Member {
        #[command(subcommand)]
        subcommand: MemberSubcommand,
    },

    /// Record a member's answer to one question
    Answer {
        team: String,
        member: String,
        /// Question index (0-based)
        index: usize,
        text: String,
        /// User id of the person answering
        #[arg(long = "as", env = "TEAMSYNC_IDENTITY", value_name = "USER_ID")]
        identity: Option<String>,
    },

    /// Browse the user directory
    User {
        #[command(subcommand)]
        subcommand: UserSubcommand,
    },

    /// Stream snapshots of a path from a running server
    Watch {
        /// Store path, e.g. teams or teams/<id>
        path: String,
        /// Server base URL (default: http://localhost:<server.port>)
        #[arg(long)]
        url: Option<String>,
        /// Exit after this many snapshots
        #[arg(long, value_name = "N")]
        count: Option<usize>,
    },

    /// Replace all data with the contents of a JSON file
    Import { file: PathBuf },

    /// Print all data as JSON
    Export,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Watch { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Team { subcommand } => cmd::team::run(&root, subcommand, cli.json),
        Commands::Member { subcommand } => cmd::member::run(&root, subcommand, cli.json),
        Commands::Answer {
            team,
            member,
            index,
            text,
            identity,
        } => cmd::answer::run(&root, &team, &member, index, &text, identity.as_deref(), cli.json),
        Commands::User { subcommand } => cmd::user::run(&root, subcommand, cli.json),
        Commands::Watch { path, url, count } => {
            cmd::watch::run(&root, &path, url.as_deref(), count, cli.json)
        }
        Commands::Import { file } => cmd::data::import(&root, &file, cli.json),
        Commands::Export => cmd::data::export(&root),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
