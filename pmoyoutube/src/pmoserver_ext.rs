//! Extension de pmoserver::Server pour intégrer le proxy YouTube
//!
//! Ce module fournit un trait d'extension permettant d'ajouter le proxy et
//! ses endpoints à un serveur pmoserver.

use crate::search::SearchResolver;
use anyhow::Result;
use pmomediacache::CacheService;
use std::sync::Arc;

/// Trait d'extension pour ajouter le proxy YouTube à un serveur pmoserver
///
/// Ce trait permet à `pmoyoutube` d'ajouter des méthodes d'extension sur
/// `pmoserver::Server` sans que pmoserver dépende de pmoyoutube.
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoyoutube::{SearchResolver, YoutubeServerExt};
/// use pmoserver::ServerBuilder;
///
/// let mut server = ServerBuilder::new_configured().build();
/// server.init_youtube_proxy(service, Arc::new(resolver)).await?;
/// server.start().await?;
/// server.wait().await;
/// ```
pub trait YoutubeServerExt {
    /// Enregistre les routes HTTP du proxy
    ///
    /// # Arguments
    ///
    /// * `service` - Service de cache déjà démarré
    /// * `resolver` - Client de l'API de recherche par titre
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /` - Page d'accueil
    /// - `GET /search?title=` - Recherche et préchargement
    /// - `GET /download?url=|title=` - Fichier audio
    /// - `GET /vdown?url=|title=` - Fichier vidéo
    /// - `GET /down?url=|title=` - Lien de flux direct
    /// - `GET /cache/stats` - Statistiques du cache
    async fn init_youtube_proxy(
        &mut self,
        service: Arc<CacheService>,
        resolver: Arc<SearchResolver>,
    ) -> Result<()>;

    /// Comme [`init_youtube_proxy`](Self::init_youtube_proxy), avec l'API de
    /// recherche lue dans la configuration
    async fn init_youtube_proxy_configured(&mut self, service: Arc<CacheService>) -> Result<()>;
}

// L'implémentation du trait est dans pmoserver_impl.rs
