//!
//! src/main.rs  Oct 18th, 2026
//!
//! Wires configuration, logging and the storage backends together, serves
//! the fingerprint endpoint and runs the ingest batch next to it.
//!
//!

mod config;
mod crawler;
mod cursor;
mod discovery;
mod download;
mod fetch;
mod fingerprint;
mod firestore;
mod hasher;
mod ingest;
mod logging;
mod persistent;
mod server;
mod sink;
mod storage;
mod store;
mod types;

mod errors;
use crate::errors::IngestError;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, StoreConfig};
use crate::storage::AssetUploader;
use crate::store::DocumentStore;

/// Document store and asset uploader for the configured backend
async fn build_backends(cfgs: &AppConfig) ->
    Result<(Arc<dyn DocumentStore>, Arc<dyn AssetUploader>), IngestError> {
    match &cfgs.store {
        StoreConfig::Firebase(firebase) => {
            let documents = firestore::FirestoreClient::new(&cfgs.http, firebase)?;
            let assets = storage::FirebaseStorage::new(&cfgs.http, firebase)?;
            info!(project = %firebase.project_id, "store.firebase");
            Ok((Arc::new(documents), Arc::new(assets)))
        }
        StoreConfig::Local(local) => {
            let documents = persistent::Persistent::init(&local.db_url).await?;
            let assets = storage::LocalAssetStore::new(local);
            info!(db = %local.db_url, assets = %local.asset_dir.display(), "store.local");
            Ok((Arc::new(documents), Arc::new(assets)))
        }
    }
}

fn build_crawler(
    cfgs: &AppConfig,
    orchestrator: Arc<ingest::Orchestrator>
) -> Result<crawler::Crawler, IngestError> {
    let artists = crawler::load_artists(&cfgs.discovery.artists_file)?;
    let deezer  = fetch::DeezerClient::new(&cfgs.http, &cfgs.discovery)?;
    let youtube = fetch::YoutubeClient::new(&cfgs.http, &cfgs.discovery)?;

    let sources = crawler::Sources {
        catalog: Arc::new(discovery::DeezerCatalog::new(deezer, &cfgs.http)),
        search: Arc::new(discovery::YoutubeSearch::new(youtube, &cfgs.http)),
        downloader: Arc::new(download::YtDlpDownloader::new(&cfgs.discovery))
    };
    let disk = sink::DiskZstdSink::new(
        &cfgs.persistence.raw_store_root,
        cfgs.persistence.zstd_level
    );

    Ok(crawler::Crawler::new(cfgs, artists, sources, orchestrator, Some(disk)))
}

#[tokio::main]
async fn main() -> Result<(), IngestError> {
    let cfgs = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    let (documents, assets) = build_backends(&cfgs).await?;
    let extractor: Arc<dyn fingerprint::FingerprintExtractor> =
        Arc::new(fingerprint::FpcalcExtractor::new(&cfgs.fingerprint));
    let index = Arc::new(store::TrackIndex::new(documents.clone(), cfgs.ingest.collection.clone()));

    let orchestrator = Arc::new(ingest::Orchestrator::new(
        extractor.clone(),
        index,
        assets,
        documents,
        cfgs.ingest.clone(),
        cfgs.discovery.files_dir.clone()
    ));

    let shutdown = CancellationToken::new();
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(msg = "shutting down", "main.signal");
                shutdown.cancel();
            }
        })
    };

    let batch = if cfgs.server.run_batch {
        let crawler = build_crawler(&cfgs, orchestrator)?.with_shutdown(shutdown.clone());
        Some(tokio::spawn(crawler.run()))
    } else {
        None
    };

    let state = Arc::new(server::AppState {
        extractor,
        uploads_dir: cfgs.server.uploads_dir.clone()
    });
    let app = server::router(state, &cfgs.server);
    let served = server::serve(app, cfgs.server.port, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(batch) = batch {
        match batch.await {
            Ok(Ok(stats)) => info!(stats = ?stats, "main.batch.done"),
            Ok(Err(e)) => error!(error = %e, "main.batch.failed"),
            Err(e) => error!(error = ?e, "main.batch.panicked")
        }
    }
    trigger.abort();

    served
}
