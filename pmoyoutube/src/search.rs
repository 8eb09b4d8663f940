//! Résolution d'un titre libre vers une URL YouTube
//!
//! Les requêtes `title=...` (et les liens Spotify, qui ne sont pas
//! téléchargeables directement) passent par une API de recherche externe
//! répondant `{"link": ..., "title": ..., "duration": ...}`.

use crate::error::{Result, YoutubeError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Timeout par défaut des requêtes vers l'API de recherche
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Réponse de l'API de recherche
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// URL de la vidéo trouvée
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Durée telle que fournie par l'API (chaîne ou nombre)
    #[serde(default)]
    pub duration: serde_json::Value,
}

/// Client de l'API de recherche
#[derive(Debug, Clone)]
pub struct SearchResolver {
    client: Client,
    api_url: String,
}

impl SearchResolver {
    /// Crée un resolver avec le timeout par défaut
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_url, DEFAULT_SEARCH_TIMEOUT)
    }

    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pmoyoutube/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Interroge l'API de recherche pour un titre
    pub async fn search(&self, title: &str) -> Result<SearchResult> {
        debug!("Searching for title '{}'", title);
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("title", title)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(YoutubeError::SearchApi {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        match body.get("link").and_then(|l| l.as_str()) {
            Some(link) if !link.is_empty() => {
                let result: SearchResult = serde_json::from_value(body.clone())?;
                info!("Resolved '{}' to {}", title, link);
                Ok(result)
            }
            _ => Err(YoutubeError::NoResult(title.to_string())),
        }
    }

    /// Retourne l'URL d'une vidéo pour un titre
    pub async fn resolve_title(&self, title: &str) -> Result<String> {
        Ok(self.search(title).await?.link)
    }

    /// Calcule l'URL canonique d'une requête `url`/`title`
    ///
    /// Une URL Spotify est traitée comme un titre à rechercher.
    pub async fn canonicalize(&self, url: Option<&str>, title: Option<&str>) -> Result<String> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let title = title.map(str::trim).filter(|t| !t.is_empty());

        match (url, title) {
            (Some(url), _) if !needs_search(url) => Ok(url.to_string()),
            (Some(url), _) => self.resolve_title(url).await,
            (None, Some(title)) => self.resolve_title(title).await,
            (None, None) => Err(YoutubeError::MissingParameter(
                "url or title is required".to_string(),
            )),
        }
    }
}

/// Vrai si l'URL doit passer par la recherche plutôt que par yt-dlp
pub fn needs_search(url: &str) -> bool {
    url.contains("spotify.com")
}
