//! Gestion des erreurs du cache média

use thiserror::Error;

/// Type Result personnalisé pour pmomediacache
pub type Result<T> = std::result::Result<T, FetchError>;

/// Erreurs possibles lors de la production d'une entrée de cache
///
/// L'erreur est `Clone` : un échec survenu dans un slot de production est
/// transmis tel quel à chacun des appelants qui l'attendaient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// L'extracteur n'a fourni aucun flux ou format exploitable
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Échec d'écriture dans le cache (disque plein, permissions)
    #[error("Publish failed: {0}")]
    PublishFailure(String),

    /// La variante demandée n'existe pas pour cette ressource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Délai dépassé côté réseau ou en attente d'un producteur
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// La tâche productrice a paniqué ou a été interrompue
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// Indique si une nouvelle tentative a des chances d'aboutir
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::UpstreamTimeout(_) | FetchError::PublishFailure(_) | FetchError::Internal(_)
        )
    }

    /// Nom court du type d'erreur, utilisé dans les logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::ExtractionFailure(_) => "extraction_failure",
            FetchError::PublishFailure(_) => "publish_failure",
            FetchError::NotFound(_) => "not_found",
            FetchError::UpstreamTimeout(_) => "upstream_timeout",
            FetchError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::PublishFailure(err.to_string())
    }
}
