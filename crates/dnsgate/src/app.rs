use std::fs::File;
use std::os::fd::{FromRawFd as _, RawFd};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval_at, Instant, Interval};

use crate::allowlist::{AllowListStore, FileAllowListStore, InMemoryAllowListStore, ReloadStatus};
use crate::engine::FilterEngine;
use crate::interface::ShutdownHandle;
use crate::server::FilterServer;
use crate::upstream::UpstreamForwarder;
use crate::Args;

pub struct App;

impl App {
    pub async fn run_until_completion(args: Args) -> anyhow::Result<()> {
        let reader = open_interface(args.tun_fd).context("failed to open the interface")?;
        let writer = reader
            .try_clone()
            .context("failed to duplicate the interface descriptor")?;
        let forwarder = UpstreamForwarder::new(
            args.upstream.clone(),
            Duration::from_secs(args.upstream_timeout_secs),
        );

        match args.allowlist_path.as_ref() {
            Some(path) => {
                let store = Arc::new(FileAllowListStore::new(path, args.allowlist_cache_path()));
                // Start anyway and block everything until a reload succeeds
                match store.reload().await {
                    Ok(status) => log_reload_status(status),
                    Err(e) => tracing::error!("Error while loading the allow-list, every query will be blocked: {:#}", e),
                }
                App::serve(store, forwarder, reader, writer, &args).await
            }
            None => {
                if args.allow.is_empty() {
                    tracing::warn!("The allow-list is empty, every query will be blocked");
                }
                let store = Arc::new(InMemoryAllowListStore::new(&args.allow));
                App::serve(store, forwarder, reader, writer, &args).await
            }
        }
    }

    async fn serve<S: AllowListStore>(
        store: Arc<S>,
        forwarder: UpstreamForwarder,
        reader: File,
        writer: File,
        args: &Args,
    ) -> anyhow::Result<()> {
        // Every resolver may time out before a forward gives up
        let grace_period = forwarder.timeout() * forwarder.resolvers().len() as u32 + Duration::from_secs(1);
        let engine = Arc::new(FilterEngine::new(store.clone(), forwarder));
        let server = FilterServer::new(engine.clone(), usize::from(args.max_frame_size));
        let shutdown = ShutdownHandle::new();
        let reload_interval = args.reload_interval_secs.map(Duration::from_secs);

        tracing::info!(version = store.current().version(), "Filtering DNS traffic");

        let run = server.run(reader, writer, shutdown.clone());
        tokio::pin!(run);

        let stats = tokio::select! {
            result = &mut run => result.context("error while serving the interface")?,
            result = control_loop(store, reload_interval) => {
                result?;
                shutdown.stop();
                // The read thread only notices the flag once its pending read returns
                match tokio::time::timeout(grace_period, &mut run).await {
                    Ok(result) => result.context("error while serving the interface")?,
                    Err(_) => {
                        tracing::debug!("Interface read is still pending, not waiting for it");
                        engine.stats().snapshot()
                    }
                }
            }
        };

        tracing::info!(%stats, "Stopped");
        Ok(())
    }
}

fn open_interface(fd: RawFd) -> anyhow::Result<File> {
    anyhow::ensure!(fd >= 0, "invalid descriptor {}", fd);
    // SAFETY: the descriptor is inherited from the process that set up the
    // interface and isn't used by anything else in this process.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Serves reload requests until a stop is requested.
async fn control_loop<S: AllowListStore>(store: Arc<S>, reload_interval: Option<Duration>) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
    let mut reload_timer = reload_interval.map(|period| interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            _ = terminate.recv() => break,
            _ = interrupt.recv() => break,
            _ = hangup.recv() => {
                tracing::info!("Reloading the allow-list on SIGHUP");
                reload(store.as_ref()).await;
            }
            _ = tick(&mut reload_timer) => reload(store.as_ref()).await,
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn reload<S: AllowListStore>(store: &S) {
    match store.reload().await {
        Ok(status) => log_reload_status(status),
        Err(e) => tracing::error!("Error while reloading the allow-list: {:#}", e),
    }
}

fn log_reload_status(status: ReloadStatus) {
    match status {
        ReloadStatus::Updated { version, entries } => {
            tracing::info!(version, entries, "Allow-list updated")
        }
        ReloadStatus::FromCache { version, entries } => {
            tracing::info!(version, entries, "Allow-list loaded from the offline copy")
        }
        ReloadStatus::Unchanged { version } => tracing::debug!(version, "Allow-list is up to date"),
        ReloadStatus::Stale { version } => tracing::info!(version, "Keeping the current allow-list"),
    }
}
