//! `sshexecd`: the plain SSH exec server (spec §6, #2). Accepts any
//! auth-none client and runs each inbound exec as `sh -c`, with no
//! forwarding and no `__HOST__` env sentinel support.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use sshfwd::session::WorkerKind;
use tracing::Level;

#[derive(Parser, Debug)]
#[clap(version, author, about = "minimal SSH server that execs commands as sh -c")]
struct Args {
    #[clap(help = "port to listen on")]
    port: u16,

    #[clap(default_value = "", help = "address to bind; empty binds all interfaces")]
    bind_host: String,

    #[clap(long, help = "this server's own host key; a fresh one is generated if omitted")]
    server_key: Option<PathBuf>,

    #[clap(short, long, action, help = "file to write logs to")]
    log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "show more in logs, may be given multiple times")]
    verbose: u8,
}

fn init_logging(verbose: u8, log_file: &Option<String>) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).context("creating log file")?;
            tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(Mutex::new(file)).init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(std::io::stderr).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, &args.log_file)?;

    #[cfg(feature = "test_hooks")]
    if let Ok(test_hook_sock) = std::env::var("SSHFWD_TEST_HOOK_SOCKET_PATH") {
        sshfwd::test_hooks::TEST_HOOK_SERVER.set_socket_path(test_hook_sock);
        std::thread::spawn(|| {
            sshfwd::test_hooks::TEST_HOOK_SERVER.start();
        });
        sshfwd::test_hooks::TEST_HOOK_SERVER.wait_for_connect()?;
    }

    let key = sshfwd::hostkey::load_or_generate(args.server_key.as_deref())?;
    let ssh_config = Arc::new(russh::server::Config {
        methods: russh::MethodSet::NONE,
        keys: vec![key],
        ..Default::default()
    });

    sshfwd::server::serve(&args.bind_host, args.port, ssh_config, false, WorkerKind::Subprocess).await
}
