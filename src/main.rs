use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use macros_rs::fmt::{crashln, str};
use std::io::{self, BufRead};
use std::sync::Arc;

use fieldagent::{
    agent::{transport::WsTransport, AgentConnection, AgentSettings},
    config::{ConfigError, ConfigStore, Identity},
    helpers, logger,
    runner::ShellRunner,
    telemetry::HostTelemetry,
};

#[derive(Parser)]
#[command(version = str!(helpers::version()), about)]
struct Cli {
    /// Client ID to authenticate with; saved for later runs
    client_id: Option<String>,
    /// Control server URL; saved for later runs
    #[arg(short, long)]
    server: Option<String>,
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn print_usage() {
    println!("{} Usage: fieldagent <cliente_id>", *helpers::INFO);
    println!("{} Example: fieldagent acme", *helpers::INFO);
}

fn identity_or_exit(store: &ConfigStore, identity: Identity) -> Identity {
    if !identity.is_configured() {
        log::error!("Client ID is not configured!");
        print_usage();
    }

    let result = if helpers::is_interactive() && !identity.is_configured() {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        store.require_client_id(identity, Some(&mut input as &mut dyn BufRead))
    } else {
        store.require_client_id(identity, None)
    };

    match result {
        Ok(identity) => identity,
        Err(ConfigError::InvalidClientId) => {
            crashln!("{} Invalid Client ID. Exiting...", *helpers::FAIL)
        }
        Err(e) => crashln!("{} {e}", *helpers::FAIL),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("Unable to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run(identity: Identity) {
    let agent = match AgentConnection::new(
        identity,
        AgentSettings::default(),
        Arc::new(WsTransport::new()),
        Arc::new(HostTelemetry::new()),
        Arc::new(ShellRunner::new()),
    ) {
        Ok(agent) => agent,
        Err(e) => crashln!("{} {e}", *helpers::FAIL),
    };

    let handle = agent.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Termination signal received");
        handle.shutdown();
    });

    if let Err(e) = agent.run().await {
        log::error!("[Agent] Stopped with error: {:#}", e);
    }
}

fn main() {
    let cli = Cli::parse();

    let store = match ConfigStore::default_location() {
        Ok(store) => store,
        Err(e) => crashln!("{} {e}", *helpers::FAIL),
    };
    logger::init(cli.verbose.log_level_filter(), Some(&store.log_path()));

    log::info!("========================================");
    log::info!("fieldagent v{}", helpers::version());
    log::info!("========================================");

    let identity = store.resolve(cli.client_id.as_deref(), cli.server.as_deref());
    let identity = identity_or_exit(&store, identity);
    println!("{} Client ID: {}", *helpers::SUCCESS, identity.client_id);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => crashln!("{} Failed to start runtime: {e}", *helpers::FAIL),
    };
    runtime.block_on(run(identity));

    std::process::exit(0);
}
