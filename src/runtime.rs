//! Wires the five components together and owns the shutdown sequence
//! from the design's §4.6: stop Display, stop Cache (with a grace period
//! for in-flight writes), stop Sync, flush and close the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::CacheEngine;
use crate::config::{Config, ProviderKind};
use crate::display::DisplayScheduler;
use crate::error::{CoreError, CoreResult};
use crate::frontend::{frame_channel, status_channel, FrameReceiver, StatusReceiver};
use crate::provider::drive_folder::DriveFolderProvider;
use crate::provider::personal_cloud::PersonalCloudProvider;
use crate::provider::Provider;
use crate::store::MetadataStore;
use crate::sync::SyncController;

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RuntimeChannels {
    pub frames: FrameReceiver,
    pub status: StatusReceiver,
}

pub struct Runtime {
    store: MetadataStore,
    cache: Arc<CacheEngine>,
    sync: Arc<SyncController>,
    display: Arc<DisplayScheduler>,
    token: CancellationToken,
}

impl Runtime {
    /// Open the store, build the configured provider, and wire the three
    /// engines. Does not start any periodic task yet — call `run_until`.
    pub async fn start(config: Config) -> CoreResult<(Self, RuntimeChannels)> {
        let config = Arc::new(config);
        let store = MetadataStore::open(&config.store_path).await?;

        let provider = build_provider(&config)?;
        provider.initialize().await.map_err(CoreError::from)?;

        let (frame_tx, frame_rx) = frame_channel(8);
        let (_status_tx, status_rx) = status_channel(8);

        let token = CancellationToken::new();
        let cache = Arc::new(CacheEngine::with_shutdown(
            store.pool().clone(),
            provider.clone(),
            config.clone(),
            token.clone(),
        ));
        let sync = Arc::new(SyncController::new(store.pool().clone(), provider.clone(), config.clone()));
        let display = Arc::new(DisplayScheduler::new(store.pool().clone(), config.clone(), frame_tx));

        let runtime = Self { store, cache, sync, display, token };
        Ok((runtime, RuntimeChannels { frames: frame_rx, status: status_rx }))
    }

    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> CoreResult<()> {
        let display_handle = tokio::spawn(self.display.clone().run_loop(self.token.clone()));
        let cache_handle = tokio::spawn(self.cache.clone().run_loop(self.token.clone()));
        let sync_handle = tokio::spawn(self.sync.clone().run_loop(self.token.clone()));

        shutdown.await;
        log::info!("shutdown signal received, stopping");
        self.token.cancel();

        if display_handle.await.is_err() {
            log::warn!("display scheduler task panicked");
        }
        let mut cache_handle = cache_handle;
        if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, &mut cache_handle).await.is_err() {
            log::warn!("cache engine did not settle within the {SHUTDOWN_FLUSH_TIMEOUT:?} grace period, aborting");
            cache_handle.abort();
        }
        if sync_handle.await.is_err() {
            log::warn!("sync controller task panicked");
        }

        self.store.close().await;
        Ok(())
    }
}

fn build_provider(config: &Config) -> CoreResult<Arc<dyn Provider>> {
    let pc = &config.provider_config;
    match config.provider {
        ProviderKind::DriveFolder => {
            let provider = DriveFolderProvider::new(pc.token_path.clone(), pc.base_url.clone())
                .map_err(CoreError::from)?;
            Ok(Arc::new(provider))
        }
        ProviderKind::PersonalCloud => {
            let provider = PersonalCloudProvider::new(pc.credentials_path.clone(), pc.base_url.clone())
                .map_err(CoreError::from)?;
            Ok(Arc::new(provider))
        }
    }
}
