//! # pmoyoutube - Source YouTube pour PMOTube
//!
//! Cette crate branche le cache média (`pmomediacache`) sur YouTube :
//!
//! - [`YtDlpExtractor`] : implémentation de l'[`Extractor`](pmomediacache::Extractor)
//!   qui pilote le binaire `yt-dlp`
//! - [`SearchResolver`] : résolution d'un titre (ou d'un lien Spotify) vers
//!   une URL YouTube via une API de recherche externe
//! - [`YoutubeConfigExt`] : lecture de `sources.youtube.*` dans pmoconfig
//!
//! ## Utilisation
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmomediacache::{CacheService, MediaCacheConfigExt, Variant};
//! use pmoyoutube::{YoutubeConfigExt, YtDlpExtractor};
//! use std::sync::Arc;
//!
//! let config = get_config();
//! let settings = config
//!     .media_cache_settings()?
//!     .with_formats(config.youtube_format_selectors()?);
//! let extractor = YtDlpExtractor::new(config.ytdlp_config()?);
//!
//! let service = CacheService::start(settings, Arc::new(extractor)).await?;
//! let path = service
//!     .orchestrator()
//!     .ensure_artifact("https://www.youtube.com/watch?v=abc", Variant::Audio)
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `pmoserver` : endpoints HTTP (`/search`, `/download`, `/vdown`, `/down`)
//!   et trait [`YoutubeServerExt`] sur `pmoserver::Server`.

pub mod config_ext;
pub mod error;
pub mod search;
pub mod ytdlp;

#[cfg(feature = "pmoserver")]
pub mod api_rest;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

#[cfg(feature = "pmoserver")]
mod pmoserver_impl;

pub use config_ext::YoutubeConfigExt;
pub use error::{Result, YoutubeError};
pub use search::{SearchResolver, SearchResult};
pub use ytdlp::{YtDlpConfig, YtDlpExtractor};

#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::YoutubeServerExt;
