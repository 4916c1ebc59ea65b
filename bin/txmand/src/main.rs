mod demo_connector;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use demo_connector::DemoConnector;
use tokio::signal;
use txm_persistence::memory::MemoryPersistence;
use txm_policy::SimplePolicy;
use testing_tools::confirmation::NoopConfirmationTracker;
use txm_rpc::{Manager, ManagerConfig};
use txm_scheduler::SchedulerConfig;

#[derive(Parser)]
#[clap(about = "Transaction manager daemon")]
struct Cli {
    /// port the JSON-RPC server listens on.
    #[clap(short, long, default_value_t = 5100)]
    port:                  u16,
    /// how often the policy loop re-evaluates pending transactions, in
    /// milliseconds.
    #[clap(long, default_value_t = 5000)]
    cycle_interval_ms:     u64,
    /// number of error history entries kept per transaction.
    #[clap(long, default_value_t = 25)]
    error_history_count:   usize
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let persistence = Arc::new(MemoryPersistence::new());
    let connector = Arc::new(DemoConnector::default());
    let policy = Arc::new(SimplePolicy::new());
    let confirm_tracker = Arc::new(NoopConfirmationTracker::new());

    let config = ManagerConfig {
        error_history_count: cli.error_history_count,
        scheduler:           SchedulerConfig {
            cycle_interval:      Duration::from_millis(cli.cycle_interval_ms),
            error_history_count: cli.error_history_count
        }
    };
    let manager = Manager::new(persistence, connector, policy, confirm_tracker, config);

    let addr = format!("127.0.0.1:{}", cli.port).parse()?;
    let rpc_handle = txm_rpc::serve(manager.clone(), addr).await?;

    signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    rpc_handle.stop()?;
    manager.shutdown().await;

    Ok(())
}
