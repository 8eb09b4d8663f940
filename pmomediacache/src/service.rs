//! Service de cache complet, construit une fois par processus
//!
//! [`CacheService`] possède les stores, l'orchestrateur et les deux boucles
//! de maintenance. Les boucles s'arrêtent avec [`CacheService::shutdown`], ou
//! au drop du service.

use crate::clock::{Clock, SystemClock};
use crate::eviction::{
    EvictionMonitor, EvictionPolicy, MetadataSweeper, DEFAULT_CEILING_BYTES,
    DEFAULT_EVICTION_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
use crate::extractor::{Extractor, FormatSelectors};
use crate::metadata::{MetadataStore, DEFAULT_METADATA_TTL};
use crate::orchestrator::FetchOrchestrator;
use crate::store::ArtifactStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Attente maximale par défaut d'un appelant sur une production
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(600);

const METADATA_DIR: &str = "metadata";

/// Paramètres du service de cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Racine du cache (`audio/`, `video/`, `staging/`, `metadata/`)
    pub root: PathBuf,
    pub ceiling_bytes: u64,
    pub metadata_ttl: Duration,
    pub eviction_interval: Duration,
    pub sweep_interval: Duration,
    pub eviction_policy: EvictionPolicy,
    pub join_timeout: Option<Duration>,
    pub formats: FormatSelectors,
}

impl CacheSettings {
    /// Paramètres par défaut pour une racine donnée
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ceiling_bytes: DEFAULT_CEILING_BYTES,
            metadata_ttl: DEFAULT_METADATA_TTL,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            eviction_policy: EvictionPolicy::default(),
            join_timeout: Some(DEFAULT_JOIN_TIMEOUT),
            formats: FormatSelectors::default(),
        }
    }

    pub fn with_ceiling(mut self, bytes: u64) -> Self {
        self.ceiling_bytes = bytes;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn with_intervals(mut self, eviction: Duration, sweep: Duration) -> Self {
        self.eviction_interval = eviction;
        self.sweep_interval = sweep;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_formats(mut self, formats: FormatSelectors) -> Self {
        self.formats = formats;
        self
    }
}

/// Statistiques exposées par le service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub artifact_bytes: u64,
    pub artifact_entries: usize,
    pub metadata_entries: usize,
    pub metadata_bytes: u64,
    pub ceiling_bytes: u64,
    pub in_flight: usize,
}

/// Service de cache : stores, orchestrateur et boucles de maintenance
pub struct CacheService {
    orchestrator: Arc<FetchOrchestrator>,
    settings: CacheSettings,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    /// Démarre le service avec l'horloge système
    ///
    /// Doit être appelé depuis un runtime tokio.
    ///
    /// # Exemple
    ///
    /// ```rust,ignore
    /// use pmomediacache::{CacheService, CacheSettings};
    /// use std::sync::Arc;
    ///
    /// let service = CacheService::start(CacheSettings::new("/tmp/pmotube"), Arc::new(extractor)).await?;
    /// let path = service.orchestrator().ensure_artifact("https://youtu.be/abc", Variant::Audio).await?;
    /// service.shutdown().await;
    /// ```
    pub async fn start(settings: CacheSettings, extractor: Arc<dyn Extractor>) -> anyhow::Result<Self> {
        Self::start_with_clock(settings, extractor, Arc::new(SystemClock)).await
    }

    /// Démarre le service avec une horloge donnée
    pub async fn start_with_clock(
        settings: CacheSettings,
        extractor: Arc<dyn Extractor>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let artifacts = Arc::new(ArtifactStore::new(&settings.root)?);
        let metadata = Arc::new(MetadataStore::new(
            settings.root.join(METADATA_DIR),
            settings.metadata_ttl,
            clock,
        )?);

        if let Err(e) = artifacts.clear_staging().await {
            warn!("Could not clear staging directory: {}", e);
        }

        let orchestrator = Arc::new(
            FetchOrchestrator::new(
                Arc::clone(&artifacts),
                Arc::clone(&metadata),
                extractor,
                settings.formats.clone(),
            )
            .with_join_timeout(settings.join_timeout),
        );

        let token = CancellationToken::new();
        let monitor = EvictionMonitor::new(
            artifacts,
            settings.ceiling_bytes,
            settings.eviction_policy,
            settings.eviction_interval,
        );
        let sweeper = MetadataSweeper::new(metadata, settings.sweep_interval);

        let tasks = vec![monitor.spawn(token.clone()), sweeper.spawn(token.clone())];

        info!(
            "Media cache started in {} (ceiling {} bytes, metadata TTL {}s)",
            settings.root.display(),
            settings.ceiling_bytes,
            settings.metadata_ttl.as_secs()
        );

        Ok(Self {
            orchestrator,
            settings,
            token,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub async fn stats(&self) -> anyhow::Result<CacheStats> {
        let artifacts = self.orchestrator.artifacts();
        let metadata = self.orchestrator.metadata();
        let entries = artifacts.entries().await?;
        Ok(CacheStats {
            artifact_bytes: artifacts.current_size().await?,
            artifact_entries: entries.len(),
            metadata_entries: metadata.count().await?,
            metadata_bytes: metadata.size().await?,
            ceiling_bytes: self.settings.ceiling_bytes,
            in_flight: self.orchestrator.in_flight(),
        })
    }

    /// Arrête les boucles de maintenance et attend leur fin
    ///
    /// Les productions en cours ne sont pas interrompues.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Media cache stopped");
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
