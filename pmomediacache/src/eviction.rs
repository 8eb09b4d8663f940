//! Boucles de maintenance en arrière-plan
//!
//! - [`EvictionMonitor`] mesure la taille de l'ArtifactStore et purge quand le
//!   plafond est dépassé (`Idle → Measuring → Idle | Purging → Idle`).
//! - [`MetadataSweeper`] supprime périodiquement les métadonnées expirées.
//!
//! Aucune erreur de ces boucles n'est fatale : elle est loggée et la boucle
//! reprend au tour suivant.

use crate::metadata::MetadataStore;
use crate::store::{ArtifactStore, PurgeReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Plafond par défaut (500 Mo)
pub const DEFAULT_CEILING_BYTES: u64 = 500 * 1024 * 1024;

/// Période par défaut du contrôle de taille
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Période par défaut du balayage des métadonnées
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Politique appliquée quand le plafond est dépassé
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Vide entièrement le cache
    #[default]
    Flush,
    /// Supprime les entrées les plus anciennes jusqu'à repasser sous le plafond
    OldestFirst,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Flush => f.write_str("flush"),
            EvictionPolicy::OldestFirst => f.write_str("oldest_first"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flush" => Ok(EvictionPolicy::Flush),
            "oldest_first" | "oldest-first" | "lru" => Ok(EvictionPolicy::OldestFirst),
            other => Err(anyhow::anyhow!("Unknown eviction policy: {}", other)),
        }
    }
}

/// Résultat d'un passage du moniteur
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EvictionOutcome {
    WithinLimit {
        total: u64,
    },
    Purged {
        before: u64,
        after: u64,
        report: PurgeReport,
    },
}

/// Surveillance de la taille de l'ArtifactStore
pub struct EvictionMonitor {
    store: Arc<ArtifactStore>,
    ceiling: u64,
    policy: EvictionPolicy,
    interval: Duration,
}

impl EvictionMonitor {
    pub fn new(
        store: Arc<ArtifactStore>,
        ceiling: u64,
        policy: EvictionPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            ceiling,
            policy,
            interval,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Effectue un passage : mesure, puis purge si le plafond est dépassé
    ///
    /// Après une purge, la taille est remesurée : si des publications
    /// concurrentes l'ont repoussée au-dessus du plafond, le cache est vidé
    /// une seconde fois. Elle n'y reste que si des suppressions échouent
    /// (loggées).
    pub async fn run_once(&self) -> anyhow::Result<EvictionOutcome> {
        let before = self.store.current_size().await?;
        if before <= self.ceiling {
            debug!("Cache size {} within ceiling {}", before, self.ceiling);
            return Ok(EvictionOutcome::WithinLimit { total: before });
        }

        info!(
            "Cache size {} exceeds ceiling {}, purging ({})",
            before, self.ceiling, self.policy
        );
        let mut report = match self.policy {
            EvictionPolicy::Flush => self.store.evict_all().await?,
            EvictionPolicy::OldestFirst => self.store.evict_oldest_until(self.ceiling).await?,
        };

        let mut after = self.store.current_size().await?;
        if after > self.ceiling {
            // Des fichiers sont apparus pendant la purge
            let extra = self.store.evict_all().await?;
            report.removed += extra.removed;
            report.freed_bytes += extra.freed_bytes;
            report.failures += extra.failures;
            after = self.store.current_size().await?;
        }

        if after > self.ceiling {
            warn!(
                "Cache still above ceiling after purge ({} > {}, {} failed deletions)",
                after, self.ceiling, report.failures
            );
        } else {
            info!(
                "Evicted {} entries, freed {} bytes (cache size: {} -> {})",
                report.removed, report.freed_bytes, before, after
            );
        }

        Ok(EvictionOutcome::Purged {
            before,
            after,
            report,
        })
    }

    /// Lance la boucle de surveillance jusqu'à l'annulation de `token`
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Eviction monitor started (ceiling {} bytes, every {}s)",
                self.ceiling,
                self.interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.run_once().await {
                    warn!("Eviction pass failed: {}", e);
                }
            }

            info!("Eviction monitor stopped");
        })
    }
}

/// Balayage périodique des métadonnées expirées
pub struct MetadataSweeper {
    store: Arc<MetadataStore>,
    interval: Duration,
}

impl MetadataSweeper {
    pub fn new(store: Arc<MetadataStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Lance la boucle de balayage jusqu'à l'annulation de `token`
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Metadata sweeper started (every {}s)",
                self.interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.store.sweep_expired().await {
                    Ok(removed) => debug!("Metadata sweep done ({} removed)", removed),
                    Err(e) => warn!("Metadata sweep failed: {}", e),
                }
            }

            info!("Metadata sweeper stopped");
        })
    }
}
