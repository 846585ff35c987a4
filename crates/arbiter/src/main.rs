use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;

use api_types::{
    PolicyItem, POLICY_SUPPORTS_MULTIPLE_SECURE_CODECS,
    POLICY_SUPPORTS_SECURE_WITH_NON_SECURE_CODEC,
};
use arbiter::config::{CheckPriorityArgs, Cli, Commands, DaemonArgs};
use arbiter::logging;
use arbiter::process_info::{ProcProcessInfo, ProcessInfo};
use arbiter::service::ResourceArbiter;
use reclaim::ipc::IpcArbiterServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::CheckPriority(args) => run_check_priority(args),
    }
}

async fn run_daemon(args: DaemonArgs) -> Result<()> {
    let _log_guard = logging::init(args.log_file.as_deref())?;

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic in arbiter thread: {}", info);
        default_panic(info);
    }));

    tracing::info!("starting media resource arbiter");

    std::fs::create_dir_all(&args.socket_dir).context("create socket directory failed")?;

    let arbiter = Arc::new(ResourceArbiter::new(Arc::new(ProcProcessInfo)));
    arbiter.config(&[
        PolicyItem::new(
            POLICY_SUPPORTS_MULTIPLE_SECURE_CODECS,
            args.supports_multiple_secure_codecs as u64,
        ),
        PolicyItem::new(
            POLICY_SUPPORTS_SECURE_WITH_NON_SECURE_CODEC,
            args.supports_secure_with_non_secure_codec as u64,
        ),
    ]);

    if args.prune_interval_secs > 0 {
        let arbiter = Arc::clone(&arbiter);
        let prune_interval = Duration::from_secs(args.prune_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(prune_interval);
            loop {
                interval.tick().await;
                arbiter.prune_dead_processes();
                let stats = arbiter.stats();
                tracing::debug!(
                    "registry: {} processes, {} clients, {} resources",
                    stats.processes,
                    stats.clients,
                    stats.resources
                );
            }
        });
    }

    let server = Arc::new(IpcArbiterServer::new(
        Arc::clone(&arbiter),
        args.socket_dir.clone(),
    ));
    let accept_interval = Duration::from_secs(args.accept_interval_secs.max(1));

    tracing::info!("watching {:?} for client connections", args.socket_dir);
    loop {
        let scan_server = Arc::clone(&server);
        let connected = tokio::task::spawn_blocking(move || scan_server.scan_clients())
            .await
            .context("accept task failed")?
            .map_err(|e| anyhow::anyhow!("scanning for clients failed: {e}"))?;
        if connected > 0 {
            tracing::info!("connected {} new client(s)", connected);
        }
        tokio::time::sleep(accept_interval).await;
    }
}

fn run_check_priority(args: CheckPriorityArgs) -> Result<()> {
    logging::init(None)?;

    match ProcProcessInfo.priority(args.pid) {
        Some(priority) => {
            tracing::info!("pid {} has priority {}", args.pid, priority);
            Ok(())
        }
        None => Err(anyhow::anyhow!(
            "cannot read priority of pid {}",
            args.pid
        )),
    }
}
