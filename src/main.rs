//! Shell-relay binary entry point.

use std::process;

use shell_relay::cli::{self, Command};
use shell_relay::config::Config;
use shell_relay::{client, host, logging, relay};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run 'shell-relay --help' for usage.");
            process::exit(1);
        }
    };

    if args.help {
        cli::print_help();
        return;
    }
    if args.version {
        cli::print_version();
        return;
    }
    let Some(command) = args.command else {
        cli::print_help();
        process::exit(1);
    };

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging already initialized: {}", e);
    }
    info!("shell-relay v{}", env!("CARGO_PKG_VERSION"));

    let code = match command {
        Command::Relay => run_relay(&config).await,
        Command::Host => run_host(&config).await,
        Command::Client => run_client(&config).await,
    };

    // The client's stdin reader sits on a blocking thread that would keep
    // the runtime alive.
    process::exit(code);
}

async fn run_relay(config: &Config) -> i32 {
    let server = match config.to_server_config() {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "invalid relay configuration");
            return 1;
        }
    };

    match relay::serve(server, shutdown_signal()).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "relay failed");
            1
        }
    }
}

async fn run_host(config: &Config) -> i32 {
    let agent = match config.to_agent_config() {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "invalid host configuration");
            return 1;
        }
    };
    let policy = match config.to_policy() {
        Ok(policy) => policy,
        Err(e) => {
            error!(error = %e, "invalid host configuration");
            return 1;
        }
    };
    let shells = config.shells();
    info!(
        cwd = %policy.config().cwd.display(),
        shell = shells.first().map(|s| s.program.as_str()).unwrap_or("none"),
        mode = %config.host.mode,
        "starting host agent"
    );

    match host::run(agent, config.host.mode, policy, shells).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "host agent stopped");
            1
        }
    }
}

async fn run_client(config: &Config) -> i32 {
    let client = match config.to_client_config() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "invalid client configuration");
            return 1;
        }
    };

    match client::run(client).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
