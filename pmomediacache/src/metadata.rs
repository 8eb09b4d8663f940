//! Cache disque des métadonnées à durée de vie limitée
//!
//! Chaque entrée est un fichier `{key}.json` contenant une enveloppe :
//!
//! ```json
//! {"created_at": "2025-01-01T12:00:00Z", "payload": {"url": "...", "title": "...", "is_live": false}}
//! ```
//!
//! Une entrée n'est valide que tant que `now - created_at < ttl`. Les entrées
//! expirées sont ignorées en lecture et supprimées par [`MetadataStore::sweep_expired`].

use crate::clock::Clock;
use crate::error::{FetchError, Result};
use crate::key::CacheKey;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// TTL par défaut des métadonnées (une heure)
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    created_at: DateTime<Utc>,
    payload: T,
}

/// Cache clé → blob JSON avec TTL
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl MetadataStore {
    /// Crée le store dans `dir` (créé si nécessaire)
    pub fn new<P: AsRef<Path>>(dir: P, ttl: Duration, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            info!("Created metadata directory: {}", dir.display());
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| anyhow!("Invalid metadata TTL: {}", e))?;
        Ok(Self { dir, ttl, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(DEFAULT_METADATA_TTL)
    }

    /// Format: `{dir}/{key}.json`
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn is_fresh(&self, created_at: DateTime<Utc>) -> bool {
        self.clock.now().signed_duration_since(created_at) < self.ttl
    }

    /// Lit une entrée encore valide
    ///
    /// Une entrée absente, expirée ou illisible est un miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read metadata {}: {}", path.display(), e);
                }
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Unreadable metadata entry {}: {}", path.display(), e);
                return None;
            }
        };

        if !self.is_fresh(envelope.created_at) {
            debug!("Metadata expired: {}", key);
            return None;
        }

        debug!("Metadata hit: {}", key);
        Some(envelope.payload)
    }

    /// Enregistre une entrée datée de l'instant courant
    ///
    /// L'écriture passe par un fichier temporaire renommé, un lecteur ne voit
    /// donc jamais une entrée tronquée.
    pub async fn put<T: Serialize>(&self, key: &CacheKey, payload: &T) -> Result<()> {
        let envelope = Envelope {
            created_at: self.clock.now(),
            payload,
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| FetchError::PublishFailure(format!("metadata serialization: {}", e)))?;

        let path = self.entry_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved metadata {}", path.display());
        Ok(())
    }

    /// Supprime une entrée
    ///
    /// # Returns
    ///
    /// `true` si une entrée a été supprimée
    pub async fn invalidate(&self, key: &CacheKey) -> anyhow::Result<bool> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => {
                debug!("Invalidated metadata {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn json_files(&self) -> anyhow::Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    files.push((path, meta.len()));
                }
            }
        }
        Ok(files)
    }

    /// Fichiers temporaires `.{key}.{uuid}.tmp` plus vieux que le TTL
    ///
    /// Un `put` interrompu (crash entre l'écriture et le renommage) les laisse
    /// derrière lui ; un `put` en cours a un fichier bien plus récent.
    async fn stale_tmp_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(".tmp")) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if meta.is_file() && !self.is_fresh(DateTime::<Utc>::from(modified)) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    /// Supprime toutes les entrées expirées ou illisibles, ainsi que les
    /// fichiers temporaires orphelins
    ///
    /// Les échecs de suppression sont loggés puis ignorés.
    ///
    /// # Returns
    ///
    /// Le nombre d'entrées supprimées (fichiers temporaires non comptés)
    pub async fn sweep_expired(&self) -> anyhow::Result<usize> {
        for tmp in self.stale_tmp_files().await? {
            match fs::remove_file(&tmp).await {
                Ok(()) => debug!("Removed orphan metadata file {}", tmp.display()),
                Err(e) => warn!("Failed to remove {}: {}", tmp.display(), e),
            }
        }

        let mut removed = 0;
        for (path, _) in self.json_files().await? {
            let expired = match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<Envelope<IgnoredAny>>(&raw) {
                    Ok(envelope) => !self.is_fresh(envelope.created_at),
                    Err(_) => true,
                },
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    false
                }
            };
            if !expired {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove expired metadata {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            info!("Metadata sweep removed {} expired entries", removed);
        }
        Ok(removed)
    }

    /// Vide le cache de métadonnées
    pub async fn clear_all(&self) -> anyhow::Result<usize> {
        let mut removed = 0;
        for (path, _) in self.json_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        info!("Cleared {} metadata entries", removed);
        Ok(removed)
    }

    /// Taille totale du cache en octets
    pub async fn size(&self) -> anyhow::Result<u64> {
        Ok(self.json_files().await?.iter().map(|(_, len)| len).sum())
    }

    /// Nombre d'entrées présentes (expirées comprises)
    pub async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.json_files().await?.len())
    }
}
