mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_UNREACHABLE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "brickyard",
    version,
    about = "Manage storage clusters through a Brickyard server"
)]
struct Cli {
    /// Server URL (overrides ~/.config/brickyard/client.json).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage clusters.
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },
    /// Manage storage nodes.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Manage block devices on nodes.
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// Manage replicated volumes.
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },
    /// Download a database export to a file.
    Backup {
        /// Destination file.
        file: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ClusterAction {
    /// Create an empty cluster.
    Create,
    /// List cluster ids.
    List,
    /// Show a cluster.
    Info { id: String },
    /// Delete a cluster without nodes or volumes.
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
enum NodeAction {
    /// Add a node to a cluster and join it to the trusted pool.
    Add {
        #[arg(long)]
        cluster: String,
        /// Failure domain.
        #[arg(long, default_value_t = 1)]
        zone: u32,
        /// Hostname the executor connects to (repeatable).
        #[arg(long = "management-host", required = true)]
        manage: Vec<String>,
        /// Hostname the storage daemon peers on (repeatable).
        #[arg(long = "storage-host", required = true)]
        storage: Vec<String>,
    },
    /// Show a node.
    Info { id: String },
    /// Remove a node without devices.
    Delete { id: String },
    /// Set a node's health: online, offline or failed.
    State { id: String, state: String },
}

#[derive(Debug, Subcommand)]
enum DeviceAction {
    /// Prepare a raw block device on a node.
    Add {
        #[arg(long)]
        node: String,
        /// Device path, e.g. /dev/sdb.
        #[arg(long)]
        name: String,
    },
    /// Show a device.
    Info { id: String },
    /// Tear down a device without bricks.
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
enum VolumeAction {
    /// Create a replicated volume.
    Create {
        /// Size in GiB.
        #[arg(long)]
        size: u64,
        #[arg(long)]
        name: Option<String>,
        /// Restrict placement to one cluster.
        #[arg(long)]
        cluster: Option<String>,
        /// Copies of each brick (1 to 3).
        #[arg(long)]
        replica: Option<usize>,
    },
    /// List volumes.
    List,
    /// Show a volume.
    Info { id: String },
    /// Grow a volume by another replica set.
    Expand {
        id: String,
        /// Additional size in GiB.
        #[arg(long)]
        size: u64,
    },
    /// Delete a volume and its bricks.
    Delete { id: String },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BRICKYARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => commands::make_client(cli.server.as_deref())
            .and_then(|client| dispatch(&client, command, json)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("not found:") {
                EXIT_NOT_FOUND
            } else if msg.starts_with("HTTP error:") {
                EXIT_UNREACHABLE
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn dispatch(client: &brickyard_client::Client, command: Commands, json: bool) -> Result<u8, String> {
    use commands::{backup, cluster, device, node, volume};

    match command {
        Commands::Cluster { action } => match action {
            ClusterAction::Create => cluster::create(client, json),
            ClusterAction::List => cluster::list(client, json),
            ClusterAction::Info { id } => cluster::info(client, &id, json),
            ClusterAction::Delete { id } => cluster::delete(client, &id),
        },
        Commands::Node { action } => match action {
            NodeAction::Add {
                cluster,
                zone,
                manage,
                storage,
            } => node::add(
                client,
                &node::AddArgs {
                    cluster: &cluster,
                    zone,
                    manage: &manage,
                    storage: &storage,
                },
                json,
            ),
            NodeAction::Info { id } => node::info(client, &id, json),
            NodeAction::Delete { id } => node::delete(client, &id),
            NodeAction::State { id, state } => node::set_state(client, &id, &state, json),
        },
        Commands::Device { action } => match action {
            DeviceAction::Add { node, name } => device::add(client, &node, &name, json),
            DeviceAction::Info { id } => device::info(client, &id, json),
            DeviceAction::Delete { id } => device::delete(client, &id),
        },
        Commands::Volume { action } => match action {
            VolumeAction::Create {
                size,
                name,
                cluster,
                replica,
            } => volume::create(
                client,
                size,
                name.as_deref(),
                cluster.as_deref(),
                replica,
                json,
            ),
            VolumeAction::List => volume::list(client, json),
            VolumeAction::Info { id } => volume::info(client, &id, json),
            VolumeAction::Expand { id, size } => volume::expand(client, &id, size, json),
            VolumeAction::Delete { id } => volume::delete(client, &id),
        },
        Commands::Backup { file } => backup::run(client, &file, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}
