//! Coordination des productions : au plus un producteur par clé
//!
//! Le premier appelant d'une clé crée un slot de production et lance le
//! producteur sur sa propre tâche. Les appelants suivants rejoignent ce slot
//! et reçoivent le même résultat, succès ou échec. Le slot disparaît dès que
//! le producteur se termine : un échec n'est jamais mémorisé et la requête
//! suivante repart de zéro.
//!
//! Le producteur ne dépend d'aucun appelant : un client qui se déconnecte
//! abandonne son attente sans interrompre le téléchargement.

use crate::error::{FetchError, Result};
use crate::key::CacheKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Slot<T: Clone> {
    id: u64,
    outcome: SharedOutcome<T>,
}

type SlotMap<T> = Arc<Mutex<HashMap<CacheKey, Slot<T>>>>;

fn lock_slots<T: Clone>(slots: &SlotMap<T>) -> MutexGuard<'_, HashMap<CacheKey, Slot<T>>> {
    slots.lock().unwrap_or_else(|p| p.into_inner())
}

/// Libère le slot à la fin de la tâche productrice, y compris sur panique
struct SlotRelease<T: Clone> {
    slots: SlotMap<T>,
    key: CacheKey,
    id: u64,
}

impl<T: Clone> Drop for SlotRelease<T> {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        if slots.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.key);
        }
    }
}

/// Coordinateur single-flight par clé de cache
pub struct ProducerCoordinator<T: Clone> {
    slots: SlotMap<T>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Default for ProducerCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ProducerCoordinator<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Exécute `producer` en exclusivité pour `key`, ou rejoint la production
    /// déjà en cours
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmomediacache::{CacheKey, ProducerCoordinator, Variant};
    ///
    /// # async fn demo() -> pmomediacache::Result<()> {
    /// let coordinator = ProducerCoordinator::<String>::new();
    /// let key = CacheKey::derive("res://abc", Variant::Audio);
    /// let value = coordinator
    ///     .run_exclusive(&key, || async { Ok("produced".to_string()) })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_exclusive<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.join_or_start(key, producer).await
    }

    /// Comme [`run_exclusive`](Self::run_exclusive), mais l'attente de
    /// l'appelant est bornée par `timeout`
    ///
    /// À l'expiration, l'appelant reçoit `UpstreamTimeout` ; le producteur
    /// continue pour les autres appelants. `None` désactive la borne.
    pub async fn run_exclusive_with_timeout<F, Fut>(
        &self,
        key: &CacheKey,
        timeout: Option<Duration>,
        producer: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let outcome = self.join_or_start(key, producer);
        match timeout {
            None => outcome.await,
            Some(limit) => tokio::time::timeout(limit, outcome)
                .await
                .map_err(|_| {
                    FetchError::UpstreamTimeout(format!(
                        "gave up waiting for {} after {}s",
                        key,
                        limit.as_secs()
                    ))
                })?,
        }
    }

    fn join_or_start<F, Fut>(&self, key: &CacheKey, producer: F) -> SharedOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Vérification et insertion sous le même verrou
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get(key) {
            debug!("Joining in-flight production for {}", key);
            return slot.outcome.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let release = SlotRelease {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            id,
        };
        let work = producer();
        let handle = tokio::spawn(async move {
            let _release = release;
            work.await
        });

        let task_key = key.clone();
        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Producer task for {} failed: {}", task_key, e);
                    Err(FetchError::Internal(format!("producer task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared();

        debug!("Started production for {}", key);
        slots.insert(
            key.clone(),
            Slot {
                id,
                outcome: outcome.clone(),
            },
        );
        outcome
    }

    /// Nombre de productions en cours
    pub fn in_flight(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        lock_slots(&self.slots).contains_key(key)
    }
}
