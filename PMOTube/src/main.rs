use pmoconfig::get_config;
use pmomediacache::{CacheService, MediaCacheConfigExt};
use pmoserver::{LoggingOptions, ServerBuilder};
use pmoyoutube::{YoutubeConfigExt, YoutubeServerExt, YtDlpExtractor};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========
    let config = get_config();

    let mut server = ServerBuilder::new_configured().build();
    server.init_logging(LoggingOptions::from_config()).await;

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "PMOTube", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // ========== PHASE 2 : Cache média ==========
    info!("📦 Starting media cache...");
    let settings = config
        .media_cache_settings()?
        .with_formats(config.youtube_format_selectors()?);
    let extractor = YtDlpExtractor::new(config.ytdlp_config()?);
    let service = Arc::new(CacheService::start(settings, Arc::new(extractor)).await?);

    info!("🎬 Registering YouTube proxy...");
    server.init_youtube_proxy_configured(service.clone()).await?;

    // ========== PHASE 3 : Démarrage du serveur ==========
    info!("🌐 Starting HTTP server...");
    server.start().await?;

    let info = server.info();
    info!("✅ PMOTube is ready on http://{}:{}", info.base_url, info.http_port);
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    service.shutdown().await;
    Ok(())
}
