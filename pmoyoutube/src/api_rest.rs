//! Endpoints API REST du proxy YouTube
//!
//! Ce module définit les handlers HTTP qui s'appuient sur le cache média :
//! recherche par titre, téléchargement audio/vidéo et lien de flux direct.

use crate::error::YoutubeError;
use crate::search::SearchResolver;
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use pmomediacache::{CacheService, FetchError, Variant};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// État partagé de l'application
#[derive(Clone)]
pub struct YoutubeState {
    pub service: Arc<CacheService>,
    pub resolver: Arc<SearchResolver>,
}

/// Paramètres des endpoints de téléchargement (`url` ou `title`)
#[derive(Debug, Default, Deserialize)]
pub struct MediaParams {
    pub url: Option<String>,
    pub title: Option<String>,
}

/// Paramètres de recherche
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub title: Option<String>,
}

/// Réponse de `/search`
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub title: Option<String>,
    pub url: String,
    pub duration: serde_json::Value,
}

/// Réponse de `/down`
#[derive(Debug, Serialize)]
pub struct StreamLinkResponse {
    /// Lien direct vers le flux audio
    pub audio: String,
    /// Vrai si le fichier audio est déjà dans le cache
    pub cached: bool,
    pub title: String,
    pub is_live: bool,
}

/// Erreur HTTP : `{"error": "..."}` avec le code adapté
pub struct AppError(YoutubeError);

impl From<YoutubeError> for AppError {
    fn from(e: YoutubeError) -> Self {
        Self(e)
    }
}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        Self(YoutubeError::Fetch(e))
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            YoutubeError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            YoutubeError::NoResult(_) => StatusCode::NOT_FOUND,
            YoutubeError::SearchApi { .. } | YoutubeError::Http(_) | YoutubeError::JsonParse(_) => {
                StatusCode::BAD_GATEWAY
            }
            YoutubeError::Fetch(e) => match e {
                FetchError::NotFound(_) => StatusCode::NOT_FOUND,
                FetchError::ExtractionFailure(_) => StatusCode::BAD_GATEWAY,
                FetchError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                FetchError::PublishFailure(_) | FetchError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            YoutubeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed ({}): {}", status, self.0);
        } else {
            debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Crée le router Axum avec tous les endpoints du proxy
pub fn create_router(state: YoutubeState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/search", get(search))
        .route("/download", get(download_audio))
        .route("/vdown", get(download_video))
        .route("/down", get(stream_link))
        .route("/cache/stats", get(cache_stats))
        .with_state(state)
}

// ============ Handlers ============

async fn index() -> Html<&'static str> {
    Html(
        r#"<h1>PMOTube</h1>
<p>YouTube audio/video caching proxy</p>
<ul>
    <li>/search?title=</li>
    <li>/download?url=</li>
    <li>/vdown?url=</li>
    <li>/down?url=</li>
    <li>/cache/stats</li>
</ul>
"#,
    )
}

async fn search(
    State(state): State<YoutubeState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let title = params
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| YoutubeError::MissingParameter("title".to_string()))?;

    let result = state.resolver.search(title.trim()).await?;

    // Préchauffe le cache pour les téléchargements qui suivent en général
    state.service.orchestrator().prefetch(&result.link);

    Ok(Json(SearchResponse {
        title: result.title,
        url: result.link,
        duration: result.duration,
    }))
}

async fn download_audio(
    State(state): State<YoutubeState>,
    Query(params): Query<MediaParams>,
) -> Result<Response, AppError> {
    download(state, params, Variant::Audio).await
}

async fn download_video(
    State(state): State<YoutubeState>,
    Query(params): Query<MediaParams>,
) -> Result<Response, AppError> {
    download(state, params, Variant::Video).await
}

async fn download(
    state: YoutubeState,
    params: MediaParams,
    variant: Variant,
) -> Result<Response, AppError> {
    let locator = state
        .resolver
        .canonicalize(params.url.as_deref(), params.title.as_deref())
        .await?;
    let orchestrator = state.service.orchestrator();
    let locator = locator.as_str();
    let (file, path) =
        open_fetched(move || orchestrator.ensure_artifact(locator, variant)).await?;
    Ok(serve_attachment(file, &path, variant).await)
}

async fn stream_link(
    State(state): State<YoutubeState>,
    Query(params): Query<MediaParams>,
) -> Result<Json<StreamLinkResponse>, AppError> {
    let locator = state
        .resolver
        .canonicalize(params.url.as_deref(), params.title.as_deref())
        .await?;
    let orchestrator = state.service.orchestrator();

    let cached = orchestrator.is_cached(&locator, Variant::Audio).await;
    let descriptor = orchestrator.ensure_metadata(&locator).await?;

    Ok(Json(StreamLinkResponse {
        audio: descriptor.url,
        cached,
        title: descriptor.title,
        is_live: descriptor.is_live,
    }))
}

async fn cache_stats(State(state): State<YoutubeState>) -> Result<Response, AppError> {
    let stats = state
        .service
        .stats()
        .await
        .map_err(|e| FetchError::Internal(e.to_string()))?;
    Ok(Json(stats).into_response())
}

/// Obtient un fichier via `fetch` puis l'ouvre
///
/// Si le fichier a été évincé entre la production et l'ouverture, `fetch` est
/// rappelé une fois. Tout autre échec d'ouverture est une erreur interne.
async fn open_fetched<F, Fut>(fetch: F) -> Result<(tokio::fs::File, PathBuf), FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<PathBuf, FetchError>>,
{
    let path = fetch().await?;
    let opened = tokio::fs::File::open(&path).await;
    match opened {
        Ok(file) => Ok((file, path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} evicted before serving, fetching again", path.display());
            let path = fetch().await?;
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| FetchError::Internal(format!("{}: {}", path.display(), e)))?;
            Ok((file, path))
        }
        Err(e) => Err(FetchError::Internal(format!("{}: {}", path.display(), e))),
    }
}

/// Sert un fichier du cache en pièce jointe
///
/// Le fichier est streamé ; une éviction concurrente après l'ouverture ne
/// coupe pas la réponse en cours.
async fn serve_attachment(file: tokio::fs::File, path: &Path, variant: Variant) -> Response {
    let length = file.metadata().await.map(|m| m.len()).ok();

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("media.{}", variant.extension()));

    let content_type = match variant {
        Variant::Video => "video/mp4",
        _ => "audio/webm",
    };

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response();

    if let Some(length) = length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, length.into());
    }
    response
}
