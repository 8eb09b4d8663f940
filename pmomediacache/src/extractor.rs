//! Interface avec l'outil d'extraction externe
//!
//! Le cœur du cache ne connaît pas le protocole de l'extracteur : il lui
//! demande soit de télécharger un fichier dans un répertoire de staging privé,
//! soit de résoudre un lien de flux direct. Seuls le succès et le type d'échec
//! ([`FetchError`](crate::FetchError)) l'intéressent.

use crate::error::Result;
use crate::key::Variant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sélecteur de format par défaut pour l'audio (itag 249, repli sur le pire audio)
pub const DEFAULT_AUDIO_FORMAT: &str = "249/worstaudio";

/// Sélecteur de format par défaut pour la vidéo (mp4 H.264/AAC en 360p maximum)
pub const DEFAULT_VIDEO_FORMAT: &str =
    "best[ext=mp4][vcodec^=avc1][acodec^=mp4a][height<=360]/best[ext=mp4]/best";

/// Sélecteur de format par défaut pour les liens de flux
pub const DEFAULT_STREAM_FORMAT: &str = "249";

/// Sélecteurs de format transmis à l'extracteur, par variante
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSelectors {
    pub audio: String,
    pub video: String,
    pub stream: String,
}

impl Default for FormatSelectors {
    fn default() -> Self {
        Self {
            audio: DEFAULT_AUDIO_FORMAT.to_string(),
            video: DEFAULT_VIDEO_FORMAT.to_string(),
            stream: DEFAULT_STREAM_FORMAT.to_string(),
        }
    }
}

impl FormatSelectors {
    pub fn for_variant(&self, variant: Variant) -> &str {
        match variant {
            Variant::Audio => &self.audio,
            Variant::Video => &self.video,
            Variant::Metadata => &self.stream,
        }
    }
}

/// Demande de téléchargement adressée à l'extracteur
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Locator canonique de la ressource
    pub locator: String,
    pub variant: Variant,
    /// Sélecteur de format propre à l'extracteur
    pub format: String,
    /// Répertoire de staging réservé à cette requête
    pub staging_dir: PathBuf,
}

/// Fichier produit par l'extracteur
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Chemin exact du fichier produit
    pub path: PathBuf,
    /// Extension annoncée par l'extracteur
    pub extension: Option<String>,
}

impl ExtractedFile {
    pub fn new(path: PathBuf) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_string());
        Self { path, extension }
    }
}

/// Lien de flux direct résolu par l'extracteur
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub is_live: bool,
}

/// Collaborateur chargé de l'extraction des médias
///
/// # Exemple
///
/// ```rust,ignore
/// use pmomediacache::{DownloadRequest, ExtractedFile, Extractor, StreamDescriptor};
///
/// struct MyExtractor;
///
/// #[async_trait::async_trait]
/// impl Extractor for MyExtractor {
///     async fn download(&self, request: &DownloadRequest) -> pmomediacache::Result<ExtractedFile> {
///         let path = request.staging_dir.join("media.webm");
///         tokio::fs::write(&path, b"...").await?;
///         Ok(ExtractedFile::new(path))
///     }
///
///     async fn resolve_stream(&self, locator: &str, format: &str) -> pmomediacache::Result<StreamDescriptor> {
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Télécharge la ressource dans `request.staging_dir` et rapporte le
    /// chemin exact du fichier produit
    async fn download(&self, request: &DownloadRequest) -> Result<ExtractedFile>;

    /// Résout un lien de flux direct sans rien télécharger
    async fn resolve_stream(&self, locator: &str, format: &str) -> Result<StreamDescriptor>;
}
