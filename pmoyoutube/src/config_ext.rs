//! Extension pour intégrer la source YouTube dans pmoconfig
//!
//! Les clés lues sont sous `sources.youtube.*`.

use crate::ytdlp::YtDlpConfig;
use anyhow::Result;
use pmoconfig::Config;
use pmomediacache::extractor::{
    DEFAULT_AUDIO_FORMAT, DEFAULT_STREAM_FORMAT, DEFAULT_VIDEO_FORMAT,
};
use pmomediacache::FormatSelectors;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// URL par défaut de l'API de recherche par titre
pub const DEFAULT_SEARCH_API_URL: &str = "https://odd-block-a945.tenopno.workers.dev/search";

fn key_path(key: &'static str) -> [&'static str; 3] {
    ["sources", "youtube", key]
}

/// Trait d'extension pour configurer la source YouTube depuis pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoyoutube::YoutubeConfigExt;
///
/// let config = get_config();
/// let extractor = YtDlpExtractor::new(config.ytdlp_config()?);
/// ```
pub trait YoutubeConfigExt {
    /// Chemin du binaire yt-dlp
    fn get_ytdlp_path(&self) -> Result<PathBuf>;

    /// Fichier de cookies, relatif au répertoire de configuration
    fn get_cookie_file(&self) -> Result<Option<PathBuf>>;

    fn get_socket_timeout(&self) -> Result<Duration>;

    fn get_process_timeout(&self) -> Result<Duration>;

    /// URL de l'API de recherche par titre
    fn get_search_api_url(&self) -> Result<String>;

    /// Sélecteurs de format audio, vidéo et flux
    fn youtube_format_selectors(&self) -> Result<FormatSelectors>;

    /// Paramètres complets du processus yt-dlp
    fn ytdlp_config(&self) -> Result<YtDlpConfig>;
}

impl YoutubeConfigExt for Config {
    fn get_ytdlp_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.get_string_or(&key_path("ytdlp_path"), "yt-dlp")?))
    }

    fn get_cookie_file(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .get_optional_string(&key_path("cookie_file"))?
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                let path = PathBuf::from(p);
                if path.is_absolute() {
                    path
                } else {
                    Path::new(self.directory()).join(path)
                }
            }))
    }

    fn get_socket_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_secs(
            self.get_u64_or(&key_path("socket_timeout_secs"), 60)?,
        ))
    }

    fn get_process_timeout(&self) -> Result<Duration> {
        let secs = self.get_u64_or(&key_path("process_timeout_secs"), 900)?;
        Ok(Duration::from_secs(secs.max(1)))
    }

    fn get_search_api_url(&self) -> Result<String> {
        self.get_string_or(&key_path("search_api_url"), DEFAULT_SEARCH_API_URL)
    }

    fn youtube_format_selectors(&self) -> Result<FormatSelectors> {
        Ok(FormatSelectors {
            audio: self.get_string_or(&key_path("audio_format"), DEFAULT_AUDIO_FORMAT)?,
            video: self.get_string_or(&key_path("video_format"), DEFAULT_VIDEO_FORMAT)?,
            stream: self.get_string_or(&key_path("stream_format"), DEFAULT_STREAM_FORMAT)?,
        })
    }

    fn ytdlp_config(&self) -> Result<YtDlpConfig> {
        Ok(YtDlpConfig {
            binary: self.get_ytdlp_path()?,
            cookie_file: self.get_cookie_file()?,
            socket_timeout: self.get_socket_timeout()?,
            process_timeout: self.get_process_timeout()?,
            ..Default::default()
        })
    }
}
