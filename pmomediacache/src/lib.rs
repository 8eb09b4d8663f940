//! # pmomediacache - Cache disque des médias extraits pour PMOTube
//!
//! Cette crate implémente le sous-système de cache du proxy PMOTube :
//! dérivation des clés, stockage atomique des fichiers audio/vidéo, cache de
//! métadonnées à durée de vie limitée, coordination « un seul producteur par
//! clé » et éviction par plafond de taille.
//!
//! ## Architecture
//!
//! ```text
//! pmomediacache
//!     ├── key.rs           - CacheKey et Variant
//!     ├── store.rs         - ArtifactStore (audio/, video/, staging/)
//!     ├── metadata.rs      - MetadataStore (metadata/*.json, TTL)
//!     ├── coordinator.rs   - ProducerCoordinator (single-flight)
//!     ├── eviction.rs      - EvictionMonitor et MetadataSweeper
//!     ├── orchestrator.rs  - FetchOrchestrator
//!     ├── service.rs       - CacheService (cycle de vie)
//!     └── extractor.rs     - trait Extractor (collaborateur externe)
//! ```
//!
//! L'extraction elle-même est déléguée à une implémentation de [`Extractor`]
//! (voir `pmoyoutube` pour yt-dlp).
//!
//! ## Utilisation
//!
//! ```rust,ignore
//! use pmomediacache::{CacheService, CacheSettings, Variant};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = CacheSettings::new("/tmp/pmotube").with_ceiling(500 * 1024 * 1024);
//!     let service = CacheService::start(settings, Arc::new(MyExtractor)).await?;
//!
//!     let audio = service
//!         .orchestrator()
//!         .ensure_artifact("https://www.youtube.com/watch?v=abc", Variant::Audio)
//!         .await?;
//!     println!("Audio stocké à: {:?}", audio);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `pmoconfig` : trait [`MediaCacheConfigExt`] construisant les
//!   [`CacheSettings`] depuis la configuration.

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod extractor;
pub mod key;
pub mod metadata;
pub mod orchestrator;
pub mod service;
pub mod store;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::ProducerCoordinator;
pub use error::{FetchError, Result};
pub use eviction::{EvictionMonitor, EvictionOutcome, EvictionPolicy, MetadataSweeper};
pub use extractor::{DownloadRequest, ExtractedFile, Extractor, FormatSelectors, StreamDescriptor};
pub use key::{CacheKey, Variant};
pub use metadata::MetadataStore;
pub use orchestrator::FetchOrchestrator;
pub use service::{CacheService, CacheSettings, CacheStats};
pub use store::{ArtifactEntry, ArtifactStore, PurgeReport, StagingArea};

#[cfg(feature = "pmoconfig")]
pub use config_ext::MediaCacheConfigExt;
