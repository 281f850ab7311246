use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use beacon::config::Config;
use beacon::context::CoordContext;
use beacon::election::LeaderElector;
use beacon::node::CoordNode;
use beacon::policy::PolicySynchronizer;
use beacon::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(version)]
#[command(about = "Coordination daemon for a multi-replica CI control plane")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordination daemon (election, listener, policy sync)
    Serve(ServeArgs),

    /// Attempt a single leadership claim for a duty, then exit.
    /// Exit code 0 means this replica is the leader; 1 means it is not.
    /// Meant for wrapping externally scheduled singleton scripts.
    Claim {
        /// Singleton duty name to claim
        service: String,
    },

    /// Run one policy synchronization cycle, then exit.
    /// Exit code 1 when either document could not be pushed.
    Sync,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port for the status and room-events HTTP server (optional)
    #[arg(long)]
    status_port: Option<u16>,
}

async fn run_serve(config: Config, args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let status_addr: Option<SocketAddr> = match args.status_port {
        Some(port) => Some(format!("0.0.0.0:{}", port).parse()?),
        None => None,
    };

    let ctx = CoordContext::connect(config).await?;
    tracing::info!(
        cluster = %ctx.config.cluster_name,
        election_disabled = ctx.config.election_disabled,
        duties = ?ctx.config.singleton_duties,
        status_addr = ?status_addr,
        "Starting beacon replica"
    );

    let shutdown = install_shutdown_handler();
    CoordNode::new(ctx, status_addr).run(shutdown).await;
    Ok(())
}

async fn run_claim(config: Config, service: String) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = CoordContext::connect(config).await?;
    let elector = LeaderElector::new(ctx);

    if elector.assert_leadership(&service).await? {
        println!("leader");
    } else {
        println!("not leader");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_sync(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = CoordContext::connect(config).await?;
    let (synchronizer, _report_rx) = PolicySynchronizer::new(ctx);

    let report = synchronizer.sync_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.fully_pushed() {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    match args.command {
        Commands::Serve(serve_args) => run_serve(config, serve_args).await?,
        Commands::Claim { service } => run_claim(config, service).await?,
        Commands::Sync => run_sync(config).await?,
    }

    Ok(())
}
