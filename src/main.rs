// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use anyhow::anyhow;
use lazy_static::*;
use log::*;
use mimalloc::MiMalloc;
use parking_lot::Mutex;
use stakecoin::chain::*;
use stakecoin::settings::SETTINGS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use triomphe::Arc;

#[cfg(not(windows))]
use signal_hook::consts::TERM_SIGNALS;
#[cfg(not(windows))]
use signal_hook::flag;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

lazy_static! {
    static ref EXIT_SIGNAL: std::sync::Arc<AtomicBool> =
        std::sync::Arc::new(AtomicBool::new(false));
}

/// How often the checkpoint state is re-examined
const TICK: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    init_tracing()?;

    #[cfg(not(windows))]
    for sig in TERM_SIGNALS {
        // When terminated by a second term signal, exit with exit code 1.
        // This will do nothing the first time (because term_now is false).
        flag::register_conditional_shutdown(*sig, 1, EXIT_SIGNAL.clone())?;
        // But this will "arm" the above for the second time, by setting it to true.
        // The order of registering these is important, if you put this one first, it will
        // first arm and then terminate all in the first round.
        flag::register(*sig, EXIT_SIGNAL.clone())?;
    }

    SETTINGS.validate().map_err(|err| anyhow!(err))?;
    let config = Arc::new(ChainConfig::new(SETTINGS.node.network_name.as_str()));

    start(config)
}

#[cfg(feature = "disk")]
fn start(config: Arc<ChainConfig>) -> anyhow::Result<()> {
    if SETTINGS.node.memory_only {
        return run(config, MemoryBackend::new());
    }

    let db = create_rocksdb_backend(&SETTINGS.node.data_dir, config.network_name())
        .map_err(|err| anyhow!("{err:?}"))?;
    run(config, DiskBackend::new(db))
}

#[cfg(not(feature = "disk"))]
fn start(config: Arc<ChainConfig>) -> anyhow::Result<()> {
    if !SETTINGS.node.memory_only {
        warn!("Built without disk support, running in memory only mode");
    }

    run(config, MemoryBackend::new())
}

fn run<B: CheckpointBackend>(config: Arc<ChainConfig>, backend: B) -> anyhow::Result<()> {
    let _span = tracing::info_span!("node", network = config.network_name()).entered();
    let policy = SETTINGS.checkpoints.policy().map_err(|err| anyhow!(err))?;
    let chain = Mutex::new(BlockIndex::from_config(&config));
    let manager = {
        let mut chain = chain.lock();
        CheckpointManager::open(config.clone(), backend, policy, &mut *chain)
            .map_err(|err| anyhow!("{err}"))?
    };

    if let Some(key) = &SETTINGS.checkpoints.master_priv_key {
        manager
            .set_checkpoint_priv_key(key)
            .map_err(|err| anyhow!("{err}"))?;
        info!("Checkpoint master key loaded");
    }

    info!(
        "Running Stakecoin Core v{} on {} with {:?} checkpoint policy",
        env!("CARGO_PKG_VERSION"),
        config.network_name(),
        policy
    );
    info!("Synchronized checkpoint status: {:?}", manager.status());

    let mut last_tick: Option<Instant> = None;

    // This loop runs forever, and blocks until the exit signal is received
    while !EXIT_SIGNAL.load(Ordering::Relaxed) {
        if last_tick.map_or(true, |tick| tick.elapsed() >= TICK) {
            last_tick = Some(Instant::now());
            let now = chrono::Utc::now().timestamp();
            let mut chain = chain.lock();

            if let Err(err) = manager.block_processed(&mut *chain, &[], now) {
                error!("Checkpoint update failed: {}", err);
            }

            if let Some(warning) = manager.warnings(&chain, now) {
                warn!("{}", warning);
            }
        }

        thread::sleep(Duration::from_millis(200));
    }

    info!(
        "Stakecoin Core v{} shutting down...",
        env!("CARGO_PKG_VERSION")
    );

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
