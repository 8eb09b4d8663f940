//! Implémentation du trait YoutubeServerExt pour pmoserver::Server

use crate::api_rest::{YoutubeState, create_router};
use crate::config_ext::YoutubeConfigExt;
use crate::pmoserver_ext::YoutubeServerExt;
use crate::search::SearchResolver;
use anyhow::Result;
use pmomediacache::CacheService;
use pmoserver::Server;
use std::sync::Arc;
use tracing::info;

impl YoutubeServerExt for Server {
    async fn init_youtube_proxy(
        &mut self,
        service: Arc<CacheService>,
        resolver: Arc<SearchResolver>,
    ) -> Result<()> {
        info!(
            "Initializing YouTube proxy (search API: {})",
            resolver.api_url()
        );

        let state = YoutubeState { service, resolver };
        self.add_router("/", create_router(state)).await;

        info!("YouTube proxy endpoints available at /search, /download, /vdown, /down");
        Ok(())
    }

    async fn init_youtube_proxy_configured(&mut self, service: Arc<CacheService>) -> Result<()> {
        let config = pmoconfig::get_config();
        let resolver = SearchResolver::new(config.get_search_api_url()?)?;
        self.init_youtube_proxy(service, Arc::new(resolver)).await
    }
}
