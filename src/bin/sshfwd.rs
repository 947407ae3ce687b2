//! `sshfwd`: the forwarding proxy binary (spec §6). Two subcommands:
//! `relay`, a single-shot `ProxyCommand`-style invocation over this
//! process's own stdio, and `server`, the long-running TCP listener that
//! picks its target per-connection from the `__HOST__` env sentinel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sshfwd::config::{ProxyConfig, Target};
use sshfwd::hostspec::HostSpec;
use sshfwd::session::WorkerKind;
use tracing::Level;

#[derive(Parser, Debug)]
#[clap(version, author, about = "transparent SSH forwarding proxy")]
struct Args {
    #[clap(short, long, action, help = "file to write logs to; required in `relay` mode to see any logs at all")]
    log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "show more in logs, may be given multiple times (ignored in `relay` mode)")]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "run once over stdio, as an outer ssh client's ProxyCommand")]
    Relay {
        #[clap(help = "upstream port")]
        port: u16,
        #[clap(help = "upstream host")]
        host: String,
        #[clap(help = "username to authenticate to the upstream as")]
        user: String,
        #[clap(short = 'i', long, help = "identity file used to authenticate to the upstream")]
        identity_file: Option<PathBuf>,
        #[clap(long, help = "skip known_hosts verification and accept any upstream host key")]
        no_host_key_check: bool,
        #[clap(long, help = "this proxy's own server host key; a fresh one is generated if omitted")]
        server_key: Option<PathBuf>,
    },
    #[clap(about = "listen for inbound SSH and forward each connection per its __HOST__ env var")]
    Server {
        #[clap(default_value_t = 22, help = "port to listen on")]
        port: u16,
        #[clap(default_value = "", help = "address to bind; empty binds all interfaces")]
        bind_host: String,
        #[clap(short = 'i', long)]
        identity_file: Option<PathBuf>,
        #[clap(long)]
        no_host_key_check: bool,
        #[clap(long)]
        server_key: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8, log_file: &Option<String>, relay_mode: bool) -> Result<()> {
    // In relay mode, stderr is multiplexed with the inner SSH wire
    // protocol by the outer ssh client's ProxyCommand plumbing, so
    // logging must never land there by default (spec §7): it's forced to
    // ERROR and, absent an explicit --log-file, disabled outright.
    let level = if relay_mode {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).context("creating log file")?;
            tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(Mutex::new(file)).init();
        }
        None if !relay_mode => {
            tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(std::io::stderr).init();
        }
        None => {
            // relay mode, no log file: leave logging disabled entirely.
        }
    }
    Ok(())
}

fn build_ssh_config(server_key: Option<&PathBuf>) -> Result<Arc<russh::server::Config>> {
    let key = sshfwd::hostkey::load_or_generate(server_key.map(PathBuf::as_path))?;
    Ok(Arc::new(russh::server::Config {
        methods: russh::MethodSet::NONE,
        keys: vec![key],
        ..Default::default()
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let relay_mode = matches!(args.command, Commands::Relay { .. });
    init_logging(args.verbose, &args.log_file, relay_mode)?;

    #[cfg(feature = "test_hooks")]
    if let Ok(test_hook_sock) = std::env::var("SSHFWD_TEST_HOOK_SOCKET_PATH") {
        sshfwd::test_hooks::TEST_HOOK_SERVER.set_socket_path(test_hook_sock);
        std::thread::spawn(|| {
            sshfwd::test_hooks::TEST_HOOK_SERVER.start();
        });
        sshfwd::test_hooks::TEST_HOOK_SERVER.wait_for_connect()?;
    }

    match args.command {
        Commands::Relay { port, host, user, identity_file, no_host_key_check, server_key } => {
            let ssh_config = build_ssh_config(server_key.as_ref())?;
            let cfg = ProxyConfig {
                target: Target::Fixed(HostSpec { user: Some(user), host, port }),
                identity_file,
                host_key_check: !no_host_key_check,
                server_key,
            };
            let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
            sshfwd::server::serve_once(transport, ssh_config, true, WorkerKind::Forward(Arc::new(cfg))).await;
            Ok(())
        }
        Commands::Server { port, bind_host, identity_file, no_host_key_check, server_key } => {
            let ssh_config = build_ssh_config(server_key.as_ref())?;
            let cfg = ProxyConfig {
                target: Target::Dynamic,
                identity_file,
                host_key_check: !no_host_key_check,
                server_key,
            };
            sshfwd::server::serve(&bind_host, port, ssh_config, true, WorkerKind::Forward(Arc::new(cfg))).await
        }
    }
}
