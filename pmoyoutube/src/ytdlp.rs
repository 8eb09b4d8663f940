//! Extracteur basé sur le binaire `yt-dlp`
//!
//! Chaque téléchargement lance un processus `yt-dlp` écrivant dans le
//! répertoire de staging privé de la requête. Le chemin exact du fichier
//! produit est lu sur la sortie standard (`--print after_move:filepath`) ; à
//! défaut, le répertoire de staging est inspecté.

use async_trait::async_trait;
use pmomediacache::{
    DownloadRequest, ExtractedFile, Extractor, FetchError, StreamDescriptor, Variant,
};
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Gabarit de sortie dans le staging (`media.webm`, `media.mp4`, ...)
const OUTPUT_TEMPLATE: &str = "media.%(ext)s";

/// Paramètres du processus `yt-dlp`
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Binaire à lancer
    pub binary: PathBuf,
    /// Fichier de cookies Netscape (ignoré s'il est illisible)
    pub cookie_file: Option<PathBuf>,
    pub socket_timeout: Duration,
    /// Durée maximale d'un processus
    pub process_timeout: Duration,
    pub concurrent_fragments: u32,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            cookie_file: None,
            socket_timeout: Duration::from_secs(60),
            process_timeout: Duration::from_secs(900),
            concurrent_fragments: 4,
        }
    }
}

/// Implémentation de [`Extractor`] au-dessus de `yt-dlp`
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    /// Crée l'extracteur
    ///
    /// Un fichier de cookies configuré mais introuvable est abandonné avec un
    /// avertissement.
    pub fn new(mut config: YtDlpConfig) -> Self {
        if let Some(cookies) = &config.cookie_file {
            if cookies.is_file() {
                info!("Using cookie file at: {}", cookies.display());
            } else {
                warn!(
                    "Cookie file not found or unreadable at: {}. Continuing without cookies.",
                    cookies.display()
                );
                config.cookie_file = None;
            }
        }
        Self { config }
    }

    pub fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--socket-timeout".into(),
            self.config.socket_timeout.as_secs().to_string().into(),
        ];
        if let Some(cookies) = &self.config.cookie_file {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }
        args
    }

    /// Arguments d'un téléchargement
    pub fn download_args(&self, request: &DownloadRequest) -> Vec<OsString> {
        let mut args = self.common_args();
        args.push("-f".into());
        args.push(request.format.as_str().into());
        args.push("-o".into());
        args.push(request.staging_dir.join(OUTPUT_TEMPLATE).into_os_string());
        args.push("--concurrent-fragments".into());
        args.push(self.config.concurrent_fragments.to_string().into());
        if request.variant == Variant::Video {
            args.push("--merge-output-format".into());
            args.push("mp4".into());
        }
        args.push("--print".into());
        args.push("after_move:filepath".into());
        args.push("--".into());
        args.push(request.locator.as_str().into());
        args
    }

    /// Arguments d'une résolution de lien (sans téléchargement)
    pub fn resolve_args(&self, locator: &str, format: &str) -> Vec<OsString> {
        let mut args = self.common_args();
        args.push("-J".into());
        args.push("--skip-download".into());
        args.push("-f".into());
        args.push(format.into());
        args.push("--".into());
        args.push(locator.into());
        args
    }

    async fn run(&self, args: Vec<OsString>) -> pmomediacache::Result<Output> {
        debug!("Running {} {:?}", self.config.binary.display(), args);
        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.process_timeout, child)
            .await
            .map_err(|_| {
                FetchError::UpstreamTimeout(format!(
                    "yt-dlp did not finish within {}s",
                    self.config.process_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                FetchError::ExtractionFailure(format!(
                    "cannot run {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        Ok(output)
    }
}

/// Traduit la sortie d'erreur de `yt-dlp` en [`FetchError`]
pub fn classify_failure(stderr: &str) -> FetchError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp failed without output")
        .trim()
        .to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("requested format is not available")
        || lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("http error 404")
    {
        FetchError::NotFound(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        FetchError::UpstreamTimeout(message)
    } else {
        FetchError::ExtractionFailure(message)
    }
}

/// Dernier chemin imprimé par `--print after_move:filepath`
fn printed_path(stdout: &[u8]) -> Option<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(PathBuf::from)
}

/// Cherche le fichier produit dans le staging
///
/// Les fichiers temporaires de yt-dlp sont ignorés ; l'extension canonique de
/// la variante est préférée.
async fn find_produced_file(staging: &Path, variant: Variant) -> Option<PathBuf> {
    let mut read_dir = tokio::fs::read_dir(staging).await.ok()?;
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if matches!(ext, "part" | "ytdl" | "temp") {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            candidates.push(path);
        }
    }

    let preferred = candidates
        .iter()
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some(variant.extension()))
        .cloned();
    preferred.or_else(|| candidates.into_iter().next())
}

/// Choisit l'URL du premier format du sélecteur disponible
///
/// Les alternatives du sélecteur (`249/worstaudio`) sont comparées aux
/// `format_id` annoncés ; à défaut, l'URL principale du document est retenue.
pub fn select_stream_url(info: &Value, selector: &str) -> Option<String> {
    let formats = info.get("formats").and_then(Value::as_array);
    for wanted in selector.split('/').map(str::trim).filter(|s| !s.is_empty()) {
        let found = formats.and_then(|formats| {
            formats.iter().find(|f| match f.get("format_id") {
                Some(Value::String(id)) => id == wanted,
                Some(Value::Number(id)) => id.to_string() == wanted,
                _ => false,
            })
        });
        if let Some(url) = found.and_then(|f| f.get("url")).and_then(Value::as_str) {
            return Some(url.to_string());
        }
    }
    info.get("url").and_then(Value::as_str).map(str::to_string)
}

/// Construit le [`StreamDescriptor`] d'un document `yt-dlp -J`
pub fn descriptor_from_info(info: &Value, selector: &str) -> pmomediacache::Result<StreamDescriptor> {
    let url = select_stream_url(info, selector)
        .ok_or_else(|| FetchError::NotFound(format!("format {} not available", selector)))?;
    Ok(StreamDescriptor {
        url,
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        is_live: info.get("is_live").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn download(&self, request: &DownloadRequest) -> pmomediacache::Result<ExtractedFile> {
        let output = self.run(self.download_args(request)).await?;

        let produced = match printed_path(&output.stdout) {
            Some(path) if path.is_file() => Some(path),
            _ => find_produced_file(&request.staging_dir, request.variant).await,
        };

        match produced {
            Some(path) => {
                debug!("yt-dlp produced {}", path.display());
                Ok(ExtractedFile::new(path))
            }
            None => Err(FetchError::ExtractionFailure(format!(
                "yt-dlp reported success but produced no file for {}",
                request.locator
            ))),
        }
    }

    async fn resolve_stream(
        &self,
        locator: &str,
        format: &str,
    ) -> pmomediacache::Result<StreamDescriptor> {
        let output = self.run(self.resolve_args(locator, format)).await?;
        let info: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            FetchError::ExtractionFailure(format!("invalid yt-dlp JSON output: {}", e))
        })?;
        descriptor_from_info(&info, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(variant: Variant) -> DownloadRequest {
        DownloadRequest {
            locator: "https://youtu.be/abc".into(),
            variant,
            format: "249/worstaudio".into(),
            staging_dir: PathBuf::from("/tmp/staging/x"),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_download_args() {
        let extractor = YtDlpExtractor::new(YtDlpConfig::default());
        let args = strings(extractor.download_args(&request(Variant::Audio)));

        assert!(args.windows(2).any(|w| w == ["-f", "249/worstaudio"]));
        assert!(args.windows(2).any(|w| w == ["-o", "/tmp/staging/x/media.%(ext)s"]));
        assert!(args.windows(2).any(|w| w == ["--socket-timeout", "60"]));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
        assert!(!args.contains(&"--cookies".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");

        let video = strings(extractor.download_args(&request(Variant::Video)));
        assert!(video.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
    }

    #[test]
    fn test_missing_cookie_file_is_dropped() {
        let extractor = YtDlpExtractor::new(YtDlpConfig {
            cookie_file: Some(PathBuf::from("/nonexistent/cookies.txt")),
            ..Default::default()
        });
        assert!(extractor.config().cookie_file.is_none());
    }

    #[test]
    fn test_existing_cookie_file_is_passed() {
        let cookies = tempfile::NamedTempFile::new().unwrap();
        let extractor = YtDlpExtractor::new(YtDlpConfig {
            cookie_file: Some(cookies.path().to_path_buf()),
            ..Default::default()
        });
        let args = strings(extractor.resolve_args("https://youtu.be/abc", "249"));
        assert!(args.contains(&"--cookies".to_string()));
        assert!(args.contains(&"-J".to_string()));
        assert!(args.contains(&"--skip-download".to_string()));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Requested format is not available"),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Unable to download webpage: The read operation timed out"),
            FetchError::UpstreamTimeout(_)
        ));
        match classify_failure("WARNING: foo\nERROR: Sign in to confirm you're not a bot\n") {
            FetchError::ExtractionFailure(msg) => {
                assert_eq!(msg, "ERROR: Sign in to confirm you're not a bot")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_select_stream_url() {
        let info = json!({
            "title": "Song",
            "url": "https://cdn/top",
            "formats": [
                {"format_id": "140", "url": "https://cdn/140"},
                {"format_id": "249", "url": "https://cdn/249"}
            ]
        });
        assert_eq!(select_stream_url(&info, "249").unwrap(), "https://cdn/249");
        assert_eq!(select_stream_url(&info, "251/140").unwrap(), "https://cdn/140");
        assert_eq!(select_stream_url(&info, "251").unwrap(), "https://cdn/top");
    }

    #[test]
    fn test_descriptor_from_info() {
        let info = json!({
            "is_live": true,
            "formats": [{"format_id": "249", "url": "https://cdn/249"}]
        });
        let descriptor = descriptor_from_info(&info, "249").unwrap();
        assert_eq!(descriptor.title, "Unknown");
        assert!(descriptor.is_live);

        let missing = descriptor_from_info(&json!({"formats": []}), "249");
        assert!(matches!(missing, Err(FetchError::NotFound(_))));
    }

    #[test]
    fn test_printed_path_takes_last_line() {
        assert_eq!(
            printed_path(b"/tmp/a.webm\n/tmp/b.webm\n\n"),
            Some(PathBuf::from("/tmp/b.webm"))
        );
        assert_eq!(printed_path(b"  \n"), None);
    }

    #[tokio::test]
    async fn test_find_produced_file_prefers_variant_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("media.f137.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("media.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("media.mp4"), b"x").unwrap();

        let found = find_produced_file(dir.path(), Variant::Video).await.unwrap();
        assert_eq!(found, dir.path().join("media.mp4"));
    }
}
