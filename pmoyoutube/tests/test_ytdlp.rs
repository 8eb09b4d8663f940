//! Tests de YtDlpExtractor avec un faux binaire `yt-dlp` (script shell)
#![cfg(unix)]

use pmomediacache::{CacheService, CacheSettings, Extractor, FetchError, Variant};
use pmoyoutube::{YtDlpConfig, YtDlpExtractor};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Faux yt-dlp : écrit le fichier demandé par `-o`, imprime son chemin et
/// compte ses invocations
const FAKE_YTDLP: &str = r#"#!/bin/sh
count_file="$(dirname "$0")/calls"
echo call >> "$count_file"
out=""
json=0
merge=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -J) json=1 ;;
    --merge-output-format) merge="$2"; shift ;;
  esac
  shift
done
if [ "$json" = 1 ]; then
  echo '{"title":"Fake Song","is_live":false,"url":"https://cdn.example/top","formats":[{"format_id":"140","url":"https://cdn.example/140"},{"format_id":"249","url":"https://cdn.example/249"}]}'
  exit 0
fi
ext=webm
[ -n "$merge" ] && ext="$merge"
file=$(echo "$out" | sed "s/%(ext)s/$ext/")
printf 'fake media' > "$file"
echo "$file"
"#;

const UNAVAILABLE_YTDLP: &str = r#"#!/bin/sh
echo "ERROR: [youtube] abc: Video unavailable. This video is private" >&2
exit 1
"#;

const SLOW_YTDLP: &str = r#"#!/bin/sh
sleep 5
"#;

/// Réussit sans rien produire
const SILENT_YTDLP: &str = r#"#!/bin/sh
exit 0
"#;

/// Écrit le fichier sans imprimer son chemin
const QUIET_YTDLP: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
printf 'partial' > "$(echo "$out" | sed "s/%(ext)s/webm.part/")"
printf 'quiet media' > "$(echo "$out" | sed "s/%(ext)s/webm/")"
"#;

fn install_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("yt-dlp");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn extractor(dir: &Path, body: &str) -> YtDlpExtractor {
    YtDlpExtractor::new(YtDlpConfig {
        binary: install_script(dir, body),
        process_timeout: Duration::from_secs(10),
        ..Default::default()
    })
}

fn calls(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("calls"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn service(cache: &TempDir, extractor: YtDlpExtractor) -> CacheService {
    CacheService::start(CacheSettings::new(cache.path()), Arc::new(extractor))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_download_audio_and_reuse() {
    let bin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let service = service(&cache, extractor(bin.path(), FAKE_YTDLP)).await;
    let orchestrator = service.orchestrator();

    let path = orchestrator
        .ensure_artifact("https://youtu.be/abc", Variant::Audio)
        .await
        .unwrap();
    assert_eq!(path.extension().unwrap(), "webm");
    assert!(path.starts_with(cache.path().join("audio")));
    assert_eq!(std::fs::read(&path).unwrap(), b"fake media");

    let again = orchestrator
        .ensure_artifact("https://youtu.be/abc", Variant::Audio)
        .await
        .unwrap();
    assert_eq!(again, path);
    assert_eq!(calls(bin.path()), 1);

    // Le staging privé a été nettoyé
    let staging: Vec<_> = std::fs::read_dir(cache.path().join("staging"))
        .unwrap()
        .collect();
    assert!(staging.is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_download_video_is_merged_to_mp4() {
    let bin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let service = service(&cache, extractor(bin.path(), FAKE_YTDLP)).await;

    let path = service
        .orchestrator()
        .ensure_artifact("https://youtu.be/abc", Variant::Video)
        .await
        .unwrap();
    assert_eq!(path.extension().unwrap(), "mp4");
    assert!(path.starts_with(cache.path().join("video")));

    service.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_video_is_not_found() {
    let bin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let service = service(&cache, extractor(bin.path(), UNAVAILABLE_YTDLP)).await;

    let err = service
        .orchestrator()
        .ensure_artifact("https://youtu.be/private", Variant::Audio)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)), "{:?}", err);
    assert!(
        !service
            .orchestrator()
            .is_cached("https://youtu.be/private", Variant::Audio)
            .await
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_process_timeout() {
    let bin = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let extractor = YtDlpExtractor::new(YtDlpConfig {
        binary: install_script(bin.path(), SLOW_YTDLP),
        process_timeout: Duration::from_millis(200),
        ..Default::default()
    });

    let request = pmomediacache::DownloadRequest {
        locator: "https://youtu.be/slow".into(),
        variant: Variant::Audio,
        format: "249".into(),
        staging_dir: staging.path().to_path_buf(),
    };
    let err = extractor.download(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::UpstreamTimeout(_)), "{:?}", err);
}

#[tokio::test]
async fn test_success_without_file_is_extraction_failure() {
    let bin = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let extractor = extractor(bin.path(), SILENT_YTDLP);

    let request = pmomediacache::DownloadRequest {
        locator: "https://youtu.be/nothing".into(),
        variant: Variant::Audio,
        format: "249".into(),
        staging_dir: staging.path().to_path_buf(),
    };
    let err = extractor.download(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::ExtractionFailure(_)), "{:?}", err);
}

#[tokio::test]
async fn test_produced_file_found_in_staging() {
    let bin = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let extractor = extractor(bin.path(), QUIET_YTDLP);

    let request = pmomediacache::DownloadRequest {
        locator: "https://youtu.be/quiet".into(),
        variant: Variant::Audio,
        format: "249".into(),
        staging_dir: staging.path().to_path_buf(),
    };
    let produced = extractor.download(&request).await.unwrap();
    assert_eq!(produced.path, staging.path().join("media.webm"));
}

#[tokio::test]
async fn test_resolve_stream_is_cached_as_metadata() {
    let bin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let service = service(&cache, extractor(bin.path(), FAKE_YTDLP)).await;
    let orchestrator = service.orchestrator();

    let descriptor = orchestrator
        .ensure_metadata("https://youtu.be/abc")
        .await
        .unwrap();
    assert_eq!(descriptor.url, "https://cdn.example/249");
    assert_eq!(descriptor.title, "Fake Song");
    assert!(!descriptor.is_live);

    orchestrator
        .ensure_metadata("https://youtu.be/abc")
        .await
        .unwrap();
    assert_eq!(calls(bin.path()), 1);

    service.shutdown().await;
}
