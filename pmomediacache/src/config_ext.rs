//! Extension pour intégrer le cache média dans pmoconfig
//!
//! Ce module fournit le trait `MediaCacheConfigExt`, qui lit les clés
//! `host.media_cache.*` et construit des [`CacheSettings`] complets.

use crate::eviction::{
    EvictionPolicy, DEFAULT_CEILING_BYTES, DEFAULT_EVICTION_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
use crate::metadata::DEFAULT_METADATA_TTL;
use crate::service::{CacheSettings, DEFAULT_JOIN_TIMEOUT};
use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::time::Duration;
use tracing::warn;

const SECTION: [&str; 2] = ["host", "media_cache"];
const DEFAULT_DIR: &str = "cache";

fn key_path(key: &'static str) -> [&'static str; 3] {
    [SECTION[0], SECTION[1], key]
}

/// Trait d'extension pour configurer le cache média depuis pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmomediacache::MediaCacheConfigExt;
///
/// let config = get_config();
/// let settings = config.media_cache_settings()?;
/// println!("Cache root: {}", settings.root.display());
/// ```
pub trait MediaCacheConfigExt {
    /// Récupère le répertoire racine du cache (créé si nécessaire)
    fn get_media_cache_dir(&self) -> Result<String>;

    /// Définit le répertoire racine du cache
    fn set_media_cache_dir(&self, directory: String) -> Result<()>;

    /// Récupère le plafond de taille en octets
    fn get_media_cache_ceiling(&self) -> Result<u64>;

    /// Définit le plafond de taille en octets
    fn set_media_cache_ceiling(&self, bytes: u64) -> Result<()>;

    /// Récupère la durée de vie des métadonnées
    fn get_metadata_ttl(&self) -> Result<Duration>;

    fn get_eviction_interval(&self) -> Result<Duration>;

    fn get_sweep_interval(&self) -> Result<Duration>;

    /// Récupère la politique d'éviction (`flush` par défaut)
    fn get_eviction_policy(&self) -> Result<EvictionPolicy>;

    /// Récupère l'attente maximale d'un appelant (0 : illimitée)
    fn get_join_timeout(&self) -> Result<Option<Duration>>;

    /// Construit les paramètres du service de cache
    fn media_cache_settings(&self) -> Result<CacheSettings>;
}

impl MediaCacheConfigExt for Config {
    fn get_media_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&key_path("directory"), DEFAULT_DIR)
    }

    fn set_media_cache_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&key_path("directory"), directory)
    }

    fn get_media_cache_ceiling(&self) -> Result<u64> {
        self.get_u64_or(&key_path("ceiling_bytes"), DEFAULT_CEILING_BYTES)
    }

    fn set_media_cache_ceiling(&self, bytes: u64) -> Result<()> {
        self.set_value(&key_path("ceiling_bytes"), Value::Number(Number::from(bytes)))
    }

    fn get_metadata_ttl(&self) -> Result<Duration> {
        let secs = self.get_u64_or(&key_path("metadata_ttl_secs"), DEFAULT_METADATA_TTL.as_secs())?;
        Ok(Duration::from_secs(secs))
    }

    fn get_eviction_interval(&self) -> Result<Duration> {
        let secs = self.get_u64_or(
            &key_path("eviction_interval_secs"),
            DEFAULT_EVICTION_INTERVAL.as_secs(),
        )?;
        // Un intervalle nul ferait paniquer tokio::time::interval
        Ok(Duration::from_secs(secs.max(1)))
    }

    fn get_sweep_interval(&self) -> Result<Duration> {
        let secs = self.get_u64_or(
            &key_path("sweep_interval_secs"),
            DEFAULT_SWEEP_INTERVAL.as_secs(),
        )?;
        Ok(Duration::from_secs(secs.max(1)))
    }

    fn get_eviction_policy(&self) -> Result<EvictionPolicy> {
        match self.get_optional_string(&key_path("eviction_policy"))? {
            Some(raw) => match raw.parse() {
                Ok(policy) => Ok(policy),
                Err(e) => {
                    warn!("{}, using flush", e);
                    Ok(EvictionPolicy::Flush)
                }
            },
            None => Ok(EvictionPolicy::default()),
        }
    }

    fn get_join_timeout(&self) -> Result<Option<Duration>> {
        let secs = self.get_u64_or(&key_path("join_timeout_secs"), DEFAULT_JOIN_TIMEOUT.as_secs())?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }

    fn media_cache_settings(&self) -> Result<CacheSettings> {
        Ok(CacheSettings::new(self.get_media_cache_dir()?)
            .with_ceiling(self.get_media_cache_ceiling()?)
            .with_metadata_ttl(self.get_metadata_ttl()?)
            .with_intervals(self.get_eviction_interval()?, self.get_sweep_interval()?)
            .with_policy(self.get_eviction_policy()?)
            .with_join_timeout(self.get_join_timeout()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let settings = config.media_cache_settings().unwrap();
        assert_eq!(settings.root, dir.path().join("cache"));
        assert_eq!(settings.ceiling_bytes, 524_288_000);
        assert_eq!(settings.metadata_ttl, Duration::from_secs(3600));
        assert_eq!(settings.eviction_interval, Duration::from_secs(60));
        assert_eq!(settings.eviction_policy, EvictionPolicy::Flush);
        assert_eq!(settings.join_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_media_cache_ceiling(1000).unwrap();
        config
            .set_value(&key_path("eviction_policy"), Value::String("oldest_first".into()))
            .unwrap();
        config
            .set_value(&key_path("join_timeout_secs"), Value::Number(Number::from(0)))
            .unwrap();

        let settings = config.media_cache_settings().unwrap();
        assert_eq!(settings.ceiling_bytes, 1000);
        assert_eq!(settings.eviction_policy, EvictionPolicy::OldestFirst);
        assert_eq!(settings.join_timeout, None);
    }
}
