// Auction house entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database
// 4. Build the auction engine on top of the persisted state
// 5. Spawn the store watcher (picks up writes from other processes)
// 6. Create mpsc channels
// 7. Spawn app logic task
// 8. Run the console (blocks until quit or end of input)
// 9. Cleanup on exit

use std::sync::Arc;

use auction_house::app;
use auction_house::auction::clock::SystemClock;
use auction_house::auction::engine::AuctionEngine;
use auction_house::config;
use auction_house::console;
use auction_house::db;
use auction_house::notifier::{self, BroadcastNotifier, ChangeNotifier};
use auction_house::store::StateStore;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("Auction house starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {}s turns, db at {}",
        config.auction.turn_duration_secs, config.storage.db_path
    );

    // 3. Open database
    let db = db::Database::open(&config.storage.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.storage.db_path);
    let store: Arc<dyn StateStore> = Arc::new(db);

    // 4. Build the engine
    let notifier: Arc<dyn ChangeNotifier> = Arc::new(BroadcastNotifier::new());
    let engine = AuctionEngine::open(store.clone(), notifier.clone(), Arc::new(SystemClock))
        .context("failed to load auction state")?;

    // 5. Spawn the store watcher
    let watch_handle = tokio::spawn(notifier::watch_store(
        store,
        notifier,
        config.storage.watch_interval(),
        engine.last_applied_version(),
    ));

    // 6. Create mpsc channels
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(256);

    // 7. Spawn app logic task
    let settings = app::AppSettings::from_config(&config);
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, ui_tx, engine, settings).await {
            error!("Application loop error: {}", e);
        }
    });

    // 8. Run the console
    println!("{}", console::HELP);
    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = console::run(stdin, std::io::stdout(), ui_rx, cmd_tx).await {
        error!("Console error: {}", e);
    }

    // 9. Cleanup: wait for app task to finish (with timeout)
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    // The watcher loops forever
    watch_handle.abort();

    info!("Auction house shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (not the terminal, which is used by
/// the console).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("auction-house.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auction_house=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
