use async_trait::async_trait;
use pmomediacache::{
    ArtifactStore, CacheKey, CacheService, CacheSettings, DownloadRequest, EvictionMonitor,
    EvictionOutcome, EvictionPolicy, ExtractedFile, Extractor, FetchError, FetchOrchestrator,
    FormatSelectors, ManualClock, MetadataStore, StreamDescriptor, SystemClock, Variant,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Extracteur de test comptant ses appels
#[derive(Default)]
struct CountingExtractor {
    downloads: AtomicUsize,
    resolves: AtomicUsize,
    /// Durée simulée d'un téléchargement ou d'une résolution
    delay: Duration,
    /// Taille des fichiers produits
    size: usize,
}

impl CountingExtractor {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            ..Default::default()
        })
    }

    fn slow(size: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            size,
            delay,
            ..Default::default()
        })
    }

    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    async fn download(&self, request: &DownloadRequest) -> pmomediacache::Result<ExtractedFile> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if request.locator.contains("bad") {
            // Un fichier partiel traîne dans le staging au moment de l'échec
            tokio::fs::write(request.staging_dir.join("media.part"), b"partial")
                .await
                .unwrap();
            return Err(FetchError::ExtractionFailure(
                "no usable stream for res://bad".into(),
            ));
        }
        if request.locator.contains("missing") {
            return Err(FetchError::NotFound("format not available".into()));
        }

        let size = if request.locator.contains("empty") { 0 } else { self.size };
        let path = request
            .staging_dir
            .join(format!("media.{}", request.variant.extension()));
        tokio::fs::write(&path, vec![b'x'; size]).await.unwrap();
        Ok(ExtractedFile::new(path))
    }

    async fn resolve_stream(
        &self,
        locator: &str,
        format: &str,
    ) -> pmomediacache::Result<StreamDescriptor> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(StreamDescriptor {
            url: format!("https://cdn.example/{}?itag={}", locator, format),
            title: "Test title".into(),
            is_live: false,
        })
    }
}

struct Fixture {
    dir: TempDir,
    clock: ManualClock,
    extractor: Arc<CountingExtractor>,
    orchestrator: Arc<FetchOrchestrator>,
}

fn fixture(extractor: Arc<CountingExtractor>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::starting_now();
    let artifacts = Arc::new(ArtifactStore::new(dir.path()).unwrap());
    let metadata = Arc::new(
        MetadataStore::new(
            dir.path().join("metadata"),
            Duration::from_secs(3600),
            Arc::new(clock.clone()),
        )
        .unwrap(),
    );
    let orchestrator = Arc::new(FetchOrchestrator::new(
        artifacts,
        metadata,
        extractor.clone(),
        FormatSelectors::default(),
    ));
    Fixture {
        dir,
        clock,
        extractor,
        orchestrator,
    }
}

fn staging_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path().join("staging"))
        .unwrap()
        .next()
        .is_none()
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let fx = fixture(CountingExtractor::new(64));

    let first = fx
        .orchestrator
        .ensure_artifact("res://abc", Variant::Audio)
        .await
        .unwrap();
    assert_eq!(fx.extractor.downloads(), 1);
    assert_eq!(first.extension().unwrap(), "webm");
    let key = CacheKey::derive("res://abc", Variant::Audio);
    assert_eq!(
        first.file_name().unwrap().to_str().unwrap(),
        format!("{}.webm", key)
    );

    let second = fx
        .orchestrator
        .ensure_artifact("res://abc", Variant::Audio)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.extractor.downloads(), 1);

    let bytes = std::fs::read(&second).unwrap();
    assert_eq!(bytes.len(), 64);
    assert_eq!(bytes, std::fs::read(&first).unwrap());
    assert!(staging_is_empty(&fx.dir));
}

#[tokio::test]
async fn test_audio_and_video_are_distinct_entries() {
    let fx = fixture(CountingExtractor::new(16));

    let audio = fx
        .orchestrator
        .ensure_artifact("res://abc", Variant::Audio)
        .await
        .unwrap();
    let video = fx
        .orchestrator
        .ensure_artifact("res://abc", Variant::Video)
        .await
        .unwrap();

    assert_ne!(audio, video);
    assert_eq!(video.extension().unwrap(), "mp4");
    assert_eq!(fx.extractor.downloads(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_trigger_one_download() {
    let fx = fixture(CountingExtractor::slow(128, Duration::from_millis(50)));

    let requests = (0..10).map(|_| {
        let orchestrator = fx.orchestrator.clone();
        async move { orchestrator.ensure_artifact("res://popular", Variant::Video).await }
    });
    let results = futures::future::join_all(requests).await;

    assert_eq!(fx.extractor.downloads(), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert_eq!(fx.orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_share_the_failure() {
    let fx = fixture(CountingExtractor::slow(128, Duration::from_millis(50)));

    let requests = (0..5).map(|_| {
        let orchestrator = fx.orchestrator.clone();
        async move { orchestrator.ensure_artifact("res://bad", Variant::Audio).await }
    });
    let results = futures::future::join_all(requests).await;

    assert_eq!(fx.extractor.downloads(), 1);
    for result in results {
        assert!(matches!(result, Err(FetchError::ExtractionFailure(_))));
    }
}

#[tokio::test]
async fn test_failure_leaves_nothing_and_is_retried() {
    let fx = fixture(CountingExtractor::new(32));
    let key = CacheKey::derive("res://bad", Variant::Audio);

    let err = fx
        .orchestrator
        .ensure_artifact("res://bad", Variant::Audio)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ExtractionFailure(_)));
    assert!(!err.is_retryable());
    assert!(fx
        .orchestrator
        .artifacts()
        .lookup(&key, Variant::Audio)
        .await
        .is_none());
    assert!(fx.orchestrator.artifacts().entries().await.unwrap().is_empty());
    assert!(staging_is_empty(&fx.dir));

    // Pas de cache négatif : nouvelle tentative
    let _ = fx
        .orchestrator
        .ensure_artifact("res://bad", Variant::Audio)
        .await;
    assert_eq!(fx.extractor.downloads(), 2);
}

#[tokio::test]
async fn test_not_found_and_empty_files() {
    let fx = fixture(CountingExtractor::new(32));

    let missing = fx
        .orchestrator
        .ensure_artifact("res://missing", Variant::Video)
        .await;
    assert!(matches!(missing, Err(FetchError::NotFound(_))));

    let empty = fx
        .orchestrator
        .ensure_artifact("res://empty", Variant::Audio)
        .await;
    assert!(matches!(empty, Err(FetchError::ExtractionFailure(_))));
    assert!(!fx.orchestrator.is_cached("res://empty", Variant::Audio).await);
    assert!(staging_is_empty(&fx.dir));
}

#[tokio::test]
async fn test_join_timeout_surfaces_upstream_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = CountingExtractor::slow(8, Duration::from_millis(300));
    let orchestrator = FetchOrchestrator::new(
        Arc::new(ArtifactStore::new(dir.path()).unwrap()),
        Arc::new(
            MetadataStore::new(dir.path().join("metadata"), Duration::from_secs(3600), Arc::new(SystemClock))
                .unwrap(),
        ),
        extractor.clone(),
        FormatSelectors::default(),
    )
    .with_join_timeout(Some(Duration::from_millis(20)));

    let err = orchestrator
        .ensure_artifact("res://slow", Variant::Audio)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::UpstreamTimeout(_)));
    assert!(err.is_retryable());

    // Le producteur a continué sans l'appelant
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(orchestrator.is_cached("res://slow", Variant::Audio).await);
    assert_eq!(extractor.downloads(), 1);
}

#[tokio::test]
async fn test_metadata_ttl_boundaries() {
    let fx = fixture(CountingExtractor::new(8));

    let first = fx.orchestrator.ensure_metadata("res://abc").await.unwrap();
    assert_eq!(fx.extractor.resolves(), 1);
    assert!(fx.orchestrator.is_cached("res://abc", Variant::Metadata).await);

    fx.clock.advance(Duration::from_secs(3599));
    let cached = fx.orchestrator.ensure_metadata("res://abc").await.unwrap();
    assert_eq!(cached, first);
    assert_eq!(fx.extractor.resolves(), 1);

    fx.clock.advance(Duration::from_secs(2));
    assert!(!fx.orchestrator.is_cached("res://abc", Variant::Metadata).await);
    fx.orchestrator.ensure_metadata("res://abc").await.unwrap();
    assert_eq!(fx.extractor.resolves(), 2);
}

#[tokio::test]
async fn test_metadata_uses_stream_format() {
    let fx = fixture(CountingExtractor::new(8));
    let descriptor = fx.orchestrator.ensure_metadata("res://fmt").await.unwrap();
    assert!(descriptor.url.ends_with("itag=249"));
}

#[tokio::test]
async fn test_whole_flush_over_ceiling() {
    let fx = fixture(CountingExtractor::new(400));
    let locators = ["res://one", "res://two", "res://three"];
    for locator in locators {
        fx.orchestrator
            .ensure_artifact(locator, Variant::Audio)
            .await
            .unwrap();
    }
    let store = fx.orchestrator.artifacts().clone();
    assert_eq!(store.current_size().await.unwrap(), 1200);

    let monitor = EvictionMonitor::new(
        store.clone(),
        1000,
        EvictionPolicy::Flush,
        Duration::from_secs(60),
    );
    match monitor.run_once().await.unwrap() {
        EvictionOutcome::Purged { before, after, report } => {
            assert_eq!(before, 1200);
            assert_eq!(after, 0);
            assert_eq!(report.removed, 3);
        }
        other => panic!("expected a purge, got {:?}", other),
    }

    assert_eq!(store.current_size().await.unwrap(), 0);
    for locator in locators {
        assert!(!fx.orchestrator.is_cached(locator, Variant::Audio).await);
    }

    // Une nouvelle requête retélécharge
    fx.orchestrator
        .ensure_artifact("res://one", Variant::Audio)
        .await
        .unwrap();
    assert_eq!(fx.extractor.downloads(), 4);
}

#[tokio::test]
async fn test_prefetch_downloads_both_variants() {
    let fx = fixture(CountingExtractor::new(16));
    fx.orchestrator.prefetch("res://warm");

    for _ in 0..200 {
        if fx.orchestrator.is_cached("res://warm", Variant::Audio).await
            && fx.orchestrator.is_cached("res://warm", Variant::Video).await
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fx.orchestrator.is_cached("res://warm", Variant::Audio).await);
    assert!(fx.orchestrator.is_cached("res://warm", Variant::Video).await);
    assert_eq!(fx.extractor.downloads(), 2);
}

#[tokio::test]
async fn test_service_lifecycle_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    // Reste d'un processus précédent
    std::fs::create_dir_all(dir.path().join("staging").join("stale")).unwrap();

    let settings = CacheSettings::new(dir.path())
        .with_ceiling(1000)
        .with_intervals(Duration::from_millis(50), Duration::from_secs(3600));
    let service = CacheService::start(settings, CountingExtractor::new(300))
        .await
        .unwrap();
    assert!(!dir.path().join("staging").join("stale").exists());

    let orchestrator = service.orchestrator().clone();
    orchestrator
        .ensure_artifact("res://abc", Variant::Audio)
        .await
        .unwrap();
    orchestrator.ensure_metadata("res://abc").await.unwrap();

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.artifact_entries, 1);
    assert_eq!(stats.artifact_bytes, 300);
    assert_eq!(stats.metadata_entries, 1);
    assert_eq!(stats.ceiling_bytes, 1000);
    assert_eq!(stats.in_flight, 0);

    // 4 x 300 > 1000 : le passage périodique suivant purge
    for locator in ["res://b", "res://c", "res://d"] {
        orchestrator
            .ensure_artifact(locator, Variant::Audio)
            .await
            .unwrap();
    }
    let mut flushed = false;
    for _ in 0..200 {
        if service.stats().await.unwrap().artifact_bytes <= 1000 {
            flushed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(flushed);

    service.shutdown().await;
}

#[tokio::test]
async fn test_published_artifact_survives_crossing_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings::new(dir.path())
        .with_ceiling(1000)
        .with_intervals(Duration::from_secs(3600), Duration::from_secs(3600));
    let service = CacheService::start(settings, CountingExtractor::new(400))
        .await
        .unwrap();
    let orchestrator = service.orchestrator().clone();

    // Laisser passer le premier tick immédiat du moniteur
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut paths = Vec::new();
    for locator in ["res://a", "res://b", "res://c"] {
        paths.push(
            orchestrator
                .ensure_artifact(locator, Variant::Audio)
                .await
                .unwrap(),
        );
    }
    // 1200 octets > plafond : la purge attend le prochain passage
    tokio::time::sleep(Duration::from_millis(50)).await;

    let last = paths.last().unwrap();
    assert!(last.exists());
    assert_eq!(std::fs::read(last).unwrap().len(), 400);
    assert!(orchestrator.is_cached("res://c", Variant::Audio).await);
    assert_eq!(service.stats().await.unwrap().artifact_bytes, 1200);

    service.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_metadata_requests_resolve_once() {
    let fx = fixture(CountingExtractor::slow(16, Duration::from_millis(100)));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orchestrator = fx.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.ensure_metadata("res://live").await
        }));
    }

    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap().unwrap().url);
    }

    assert_eq!(fx.extractor.resolves(), 1);
    assert!(urls.iter().all(|u| u == &urls[0]));

    // Servi depuis le cache de métadonnées ensuite
    fx.orchestrator.ensure_metadata("res://live").await.unwrap();
    assert_eq!(fx.extractor.resolves(), 1);
}
