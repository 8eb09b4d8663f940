//! Orchestration des requêtes : cache d'abord, extracteur ensuite
//!
//! ```text
//! locator ─► clé ─► lookup ──hit──► chemin
//!                     │
//!                    miss
//!                     ▼
//!          slot de production (single-flight)
//!                     │
//!      staging privé ─► extracteur ─► publish ─► chemin
//! ```

use crate::coordinator::ProducerCoordinator;
use crate::error::{FetchError, Result};
use crate::extractor::{DownloadRequest, Extractor, FormatSelectors, StreamDescriptor};
use crate::key::{CacheKey, Variant};
use crate::metadata::MetadataStore;
use crate::store::ArtifactStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Point d'entrée des requêtes du cache
pub struct FetchOrchestrator {
    artifacts: Arc<ArtifactStore>,
    metadata: Arc<MetadataStore>,
    extractor: Arc<dyn Extractor>,
    formats: FormatSelectors,
    artifact_slots: ProducerCoordinator<PathBuf>,
    metadata_slots: ProducerCoordinator<StreamDescriptor>,
    join_timeout: Option<Duration>,
}

impl FetchOrchestrator {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        metadata: Arc<MetadataStore>,
        extractor: Arc<dyn Extractor>,
        formats: FormatSelectors,
    ) -> Self {
        Self {
            artifacts,
            metadata,
            extractor,
            formats,
            artifact_slots: ProducerCoordinator::new(),
            metadata_slots: ProducerCoordinator::new(),
            join_timeout: None,
        }
    }

    /// Borne l'attente de chaque appelant (`None` : attente illimitée)
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn formats(&self) -> &FormatSelectors {
        &self.formats
    }

    /// Nombre de productions en cours (fichiers et métadonnées)
    pub fn in_flight(&self) -> usize {
        self.artifact_slots.in_flight() + self.metadata_slots.in_flight()
    }

    /// Retourne le fichier d'une ressource, en le téléchargeant si nécessaire
    ///
    /// # Arguments
    ///
    /// * `locator` - Locator canonique de la ressource
    /// * `variant` - `Audio` ou `Video`
    ///
    /// # Errors
    ///
    /// Les erreurs de l'extracteur et de la publication sont propagées telles
    /// quelles à tous les appelants ayant rejoint la production.
    pub async fn ensure_artifact(&self, locator: &str, variant: Variant) -> Result<PathBuf> {
        if !variant.is_artifact() {
            return Err(FetchError::NotFound(format!(
                "variant {} has no media file",
                variant
            )));
        }

        let key = CacheKey::derive(locator, variant);
        if let Some(path) = self.artifacts.lookup(&key, variant).await {
            debug!("Cache hit for {} {} ({})", variant, locator, key);
            return Ok(path);
        }
        debug!("Cache miss for {} {} ({})", variant, locator, key);

        let artifacts = Arc::clone(&self.artifacts);
        let extractor = Arc::clone(&self.extractor);
        let format = self.formats.for_variant(variant).to_string();
        let locator = locator.to_string();
        let slot_key = key.clone();

        let result = self
            .artifact_slots
            .run_exclusive_with_timeout(&key, self.join_timeout, move || async move {
                // Un autre producteur a pu publier juste avant l'ouverture du slot
                if let Some(path) = artifacts.lookup(&slot_key, variant).await {
                    return Ok(path);
                }

                let staging = artifacts.staging_area().await?;
                let request = DownloadRequest {
                    locator: locator.clone(),
                    variant,
                    format,
                    staging_dir: staging.path().to_path_buf(),
                };

                let outcome: Result<PathBuf> = async {
                    info!("Downloading {} for {}", variant, locator);
                    let produced = extractor.download(&request).await?;
                    if produced.extension.as_deref() != Some(variant.extension()) {
                        debug!(
                            "Extractor produced {:?} for {}, stored as .{}",
                            produced.extension,
                            variant,
                            variant.extension()
                        );
                    }
                    artifacts.publish(&slot_key, variant, &produced.path).await
                }
                .await;

                // Succès ou échec, rien ne reste dans le staging
                staging.remove().await;
                outcome
            })
            .await;

        if let Err(e) = &result {
            error!("Failed to fetch {} for {}: {}", variant, key, e);
        }
        result
    }

    /// Retourne le lien de flux d'une ressource, depuis le cache de
    /// métadonnées s'il est encore valide
    ///
    /// Un échec d'écriture du cache n'empêche pas de retourner le lien résolu.
    pub async fn ensure_metadata(&self, locator: &str) -> Result<StreamDescriptor> {
        let key = CacheKey::derive(locator, Variant::Metadata);
        if let Some(descriptor) = self.metadata.get::<StreamDescriptor>(&key).await {
            debug!("Metadata cache hit for {}", locator);
            return Ok(descriptor);
        }

        let metadata = Arc::clone(&self.metadata);
        let extractor = Arc::clone(&self.extractor);
        let format = self.formats.stream.clone();
        let locator = locator.to_string();
        let slot_key = key.clone();

        self.metadata_slots
            .run_exclusive_with_timeout(&key, self.join_timeout, move || async move {
                if let Some(descriptor) = metadata.get::<StreamDescriptor>(&slot_key).await {
                    return Ok(descriptor);
                }

                let descriptor = extractor.resolve_stream(&locator, &format).await?;
                if let Err(e) = metadata.put(&slot_key, &descriptor).await {
                    warn!("Could not cache metadata for {}: {}", locator, e);
                }
                Ok(descriptor)
            })
            .await
    }

    /// Indique si une variante est déjà en cache, sans rien télécharger
    pub async fn is_cached(&self, locator: &str, variant: Variant) -> bool {
        let key = CacheKey::derive(locator, variant);
        match variant {
            Variant::Metadata => self.metadata.get::<StreamDescriptor>(&key).await.is_some(),
            _ => self.artifacts.lookup(&key, variant).await.is_some(),
        }
    }

    /// Lance en arrière-plan le téléchargement de l'audio et de la vidéo
    ///
    /// Les erreurs sont seulement loggées.
    pub fn prefetch(self: &Arc<Self>, locator: &str) {
        for variant in Variant::ARTIFACTS {
            let orchestrator = Arc::clone(self);
            let locator = locator.to_string();
            tokio::spawn(async move {
                match orchestrator.ensure_artifact(&locator, variant).await {
                    Ok(path) => debug!("Prefetched {} into {}", variant, path.display()),
                    Err(e) => warn!("Prefetch of {} for {} failed: {}", variant, locator, e),
                }
            });
        }
    }
}
