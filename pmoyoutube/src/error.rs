//! Gestion des erreurs pour la source YouTube

use pmomediacache::FetchError;
use thiserror::Error;

/// Type Result personnalisé pour pmoyoutube
pub type Result<T> = std::result::Result<T, YoutubeError>;

/// Erreurs possibles lors de la résolution et de la récupération d'un média
#[derive(Error, Debug)]
pub enum YoutubeError {
    /// Paramètre de requête manquant (`url` ou `title`)
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// L'API de recherche n'a rien trouvé
    #[error("No result for '{0}'")]
    NoResult(String),

    /// L'API de recherche a répondu en erreur
    #[error("Search API error (status {status})")]
    SearchApi { status: u16 },

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur du cache média
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl YoutubeError {
    /// Vérifie si l'erreur vient de la saisie du client
    pub fn is_client_error(&self) -> bool {
        matches!(self, YoutubeError::MissingParameter(_))
    }
}
