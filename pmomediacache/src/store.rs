//! Stockage des fichiers médias finis
//!
//! Organisation sur disque sous la racine du cache :
//!
//! ```text
//! <root>/
//!     audio/{key}.webm
//!     video/{key}.mp4
//!     staging/<uuid>/...     répertoires privés des téléchargements en cours
//! ```
//!
//! Un fichier n'apparaît sous son nom canonique qu'une fois complet : la
//! publication passe toujours par un renommage atomique.

use crate::error::{FetchError, Result};
use crate::key::{CacheKey, Variant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const STAGING_DIR: &str = "staging";
const PARTIAL_SUFFIX: &str = ".part";

/// Fichier présent dans l'ArtifactStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    /// Clé de l'entrée (nom de fichier pour un fichier temporaire)
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub variant: Variant,
    pub modified_at: DateTime<Utc>,
}

/// Bilan d'une purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub removed: usize,
    pub freed_bytes: u64,
    /// Suppressions en échec (loggées puis ignorées)
    pub failures: usize,
}

/// Répertoire de staging privé d'une requête
///
/// [`StagingArea::remove`] le supprime sans bloquer le runtime ; à défaut, le
/// drop délègue la suppression à `spawn_blocking`.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    removed: bool,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Supprime le répertoire et son contenu
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = fs::remove_dir_all(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staging area {}: {}", self.path.display(), e);
            }
        }
    }
}

fn remove_staging_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staging area {}: {}", path.display(), e);
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_staging_dir(&path));
            }
            Err(_) => remove_staging_dir(&path),
        }
    }
}

/// Stockage clé → fichier média
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Crée le store et ses répertoires (`audio/`, `video/`, `staging/`)
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use pmomediacache::ArtifactStore;
    ///
    /// let store = ArtifactStore::new("/tmp/pmotube-cache")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        for variant in Variant::ARTIFACTS {
            std::fs::create_dir_all(root.join(variant.as_str()))?;
        }
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        info!("Artifact store ready in {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn variant_dir(&self, variant: Variant) -> PathBuf {
        self.root.join(variant.as_str())
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Chemin canonique d'une entrée
    ///
    /// Format: `{root}/{variant}/{key}.{ext}`
    pub fn path_for(&self, key: &CacheKey, variant: Variant) -> PathBuf {
        self.variant_dir(variant)
            .join(format!("{}.{}", key, variant.extension()))
    }

    /// Cherche une entrée publiée
    ///
    /// Retourne le chemin si le fichier existe et n'est pas vide.
    pub async fn lookup(&self, key: &CacheKey, variant: Variant) -> Option<PathBuf> {
        if !variant.is_artifact() {
            return None;
        }
        let path = self.path_for(key, variant);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            Ok(_) => None,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot stat {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Réserve un répertoire de staging unique pour un téléchargement
    pub async fn staging_area(&self) -> Result<StagingArea> {
        let path = self.staging_root().join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&path).await?;
        Ok(StagingArea {
            path,
            removed: false,
        })
    }

    /// Publie un fichier terminé sous son nom canonique
    ///
    /// Le fichier source est renommé dans le store. Si le renommage échoue
    /// (autre système de fichiers, permissions), il est copié dans un fichier
    /// temporaire caché du répertoire de destination, lequel est ensuite
    /// renommé. Une entrée déjà présente est remplacée : le contenu d'une clé
    /// est supposé stable.
    ///
    /// Un fichier produit vide est refusé (`ExtractionFailure`).
    pub async fn publish(
        &self,
        key: &CacheKey,
        variant: Variant,
        source: &Path,
    ) -> Result<PathBuf> {
        if !variant.is_artifact() {
            return Err(FetchError::PublishFailure(format!(
                "variant {} is not stored as an artifact",
                variant
            )));
        }

        let meta = fs::metadata(source).await.map_err(|e| {
            FetchError::ExtractionFailure(format!(
                "produced file {} is missing: {}",
                source.display(),
                e
            ))
        })?;
        if meta.len() == 0 {
            let _ = fs::remove_file(source).await;
            return Err(FetchError::ExtractionFailure(format!(
                "produced file {} is empty",
                source.display()
            )));
        }

        let dest = self.path_for(key, variant);
        if let Err(e) = fs::rename(source, &dest).await {
            debug!(
                "Rename {} -> {} failed ({}), falling back to copy",
                source.display(),
                dest.display(),
                e
            );
            self.copy_into_place(source, &dest).await?;
        }

        info!(
            "Published {} artifact {} ({} bytes)",
            variant,
            key,
            meta.len()
        );
        Ok(dest)
    }

    async fn copy_into_place(&self, source: &Path, dest: &Path) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| FetchError::PublishFailure("destination has no parent".into()))?;
        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let partial = dir.join(format!(
            ".{}.{}{}",
            name,
            uuid::Uuid::new_v4().simple(),
            PARTIAL_SUFFIX
        ));

        if let Err(e) = fs::copy(source, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(FetchError::PublishFailure(format!(
                "copy of {} failed: {}",
                source.display(),
                e
            )));
        }
        if let Err(e) = fs::rename(&partial, dest).await {
            let _ = fs::remove_file(&partial).await;
            return Err(FetchError::PublishFailure(format!(
                "rename into {} failed: {}",
                dest.display(),
                e
            )));
        }
        if let Err(e) = fs::remove_file(source).await {
            debug!("Could not remove staged file {}: {}", source.display(), e);
        }
        Ok(())
    }

    /// Parcourt les répertoires de variantes
    ///
    /// Les fichiers temporaires de copie ne sont retournés qu'avec
    /// `include_partial`.
    async fn scan(&self, include_partial: bool) -> anyhow::Result<Vec<ArtifactEntry>> {
        let mut entries = Vec::new();
        for variant in Variant::ARTIFACTS {
            let dir = self.variant_dir(variant);
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(dir_entry) = read_dir.next_entry().await? {
                // Fichier supprimé entre-temps : on l'ignore
                let Ok(meta) = dir_entry.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let file_name = dir_entry.file_name().to_string_lossy().to_string();
                let partial = file_name.ends_with(PARTIAL_SUFFIX);
                if partial && !include_partial {
                    continue;
                }
                let key = match file_name.split_once('.') {
                    Some((stem, _)) if !partial => stem.to_string(),
                    _ => file_name.clone(),
                };
                let modified_at = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                entries.push(ArtifactEntry {
                    key,
                    path: dir_entry.path(),
                    size_bytes: meta.len(),
                    variant,
                    modified_at,
                });
            }
        }
        Ok(entries)
    }

    /// Liste les entrées publiées
    pub async fn entries(&self) -> anyhow::Result<Vec<ArtifactEntry>> {
        self.scan(false).await
    }

    /// Taille totale des fichiers audio et vidéo, fichiers temporaires compris
    pub async fn current_size(&self) -> anyhow::Result<u64> {
        Ok(self.scan(true).await?.iter().map(|e| e.size_bytes).sum())
    }

    /// Supprime une entrée
    pub async fn remove(&self, entry: &ArtifactEntry) -> std::io::Result<()> {
        match fs::remove_file(&entry.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_all(&self, entries: Vec<ArtifactEntry>) -> PurgeReport {
        let mut report = PurgeReport::default();
        for entry in entries {
            match self.remove(&entry).await {
                Ok(()) => {
                    report.removed += 1;
                    report.freed_bytes += entry.size_bytes;
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", entry.path.display(), e);
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Vide entièrement le store (audio et vidéo)
    pub async fn evict_all(&self) -> anyhow::Result<PurgeReport> {
        let entries = self.scan(true).await?;
        Ok(self.remove_all(entries).await)
    }

    /// Supprime les entrées les plus anciennes jusqu'à ce que la taille
    /// totale soit inférieure ou égale à `limit`
    pub async fn evict_oldest_until(&self, limit: u64) -> anyhow::Result<PurgeReport> {
        let mut entries = self.scan(true).await?;
        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total <= limit {
            return Ok(PurgeReport::default());
        }

        entries.sort_by_key(|e| e.modified_at);
        let mut victims = Vec::new();
        for entry in entries {
            if total <= limit {
                break;
            }
            total = total.saturating_sub(entry.size_bytes);
            victims.push(entry);
        }
        Ok(self.remove_all(victims).await)
    }

    /// Supprime les répertoires de staging laissés par un processus précédent
    ///
    /// # Returns
    ///
    /// Le nombre d'éléments supprimés
    pub async fn clear_staging(&self) -> anyhow::Result<usize> {
        let staging = self.staging_root();
        let mut removed = 0;
        let mut read_dir = fs::read_dir(&staging).await?;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            let result = if dir_entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to clear staging entry {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            info!("Cleared {} stale staging entries", removed);
        }
        Ok(removed)
    }
}
