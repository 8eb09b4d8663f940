//! Dérivation des clés de cache
//!
//! Une clé est le condensé SHA256 du couple `(locator, variant)`, tronqué à
//! 16 octets et encodé en hexadécimal (32 caractères), à la manière des clés
//! primaires de `pk_from_content_header`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Dérivé d'une ressource distante conservé par le cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Audio,
    Video,
    Metadata,
}

impl Variant {
    /// Les variantes stockées comme fichiers dans l'ArtifactStore
    pub const ARTIFACTS: [Variant; 2] = [Variant::Audio, Variant::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Audio => "audio",
            Variant::Video => "video",
            Variant::Metadata => "metadata",
        }
    }

    /// Extension canonique des fichiers de cette variante
    pub fn extension(&self) -> &'static str {
        match self {
            Variant::Audio => "webm",
            Variant::Video => "mp4",
            Variant::Metadata => "json",
        }
    }

    /// `true` pour les variantes qui produisent un fichier média
    pub fn is_artifact(&self) -> bool {
        !matches!(self, Variant::Metadata)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown variant: {0}")]
pub struct ParseVariantError(String);

impl FromStr for Variant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(Variant::Audio),
            "video" => Ok(Variant::Video),
            "metadata" => Ok(Variant::Metadata),
            other => Err(ParseVariantError(other.to_string())),
        }
    }
}

/// Clé de cache de taille fixe (32 caractères hexadécimaux)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Calcule la clé d'un locator canonique pour une variante donnée
    ///
    /// Le locator doit déjà être sous sa forme canonique (après résolution
    /// d'un titre ou d'un lien Spotify) pour que deux saisies désignant la
    /// même ressource partagent la même clé.
    ///
    /// # Exemple
    ///
    /// ```
    /// use pmomediacache::{CacheKey, Variant};
    ///
    /// let audio = CacheKey::derive("https://youtu.be/abc", Variant::Audio);
    /// let video = CacheKey::derive("https://youtu.be/abc", Variant::Video);
    /// assert_eq!(audio.as_str().len(), 32);
    /// assert_ne!(audio, video);
    /// ```
    pub fn derive(locator: &str, variant: Variant) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(variant.as_str().as_bytes());
        // Séparateur : "audio" + "x" ne doit pas valoir "audiox" + ""
        hasher.update([0u8]);
        hasher.update(locator.as_bytes());
        let digest = hasher.finalize();
        CacheKey(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
