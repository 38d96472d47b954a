use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use signoff_core::domain::chain::{ApprovalChain, ChainId};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_core::workflow::{build_chain, ChainDraft};
use signoff_db::{ChainDeleteOutcome, ChainRepository};

/// Chain definitions plus a process-wide cache of the active ones. The cache
/// is filled by `load`, dropped on every write, and refilled on next read.
pub struct ChainStore {
    repository: Arc<dyn ChainRepository>,
    active: RwLock<ActiveCache>,
}

/// `generation` moves on every invalidation, so a refill that read the
/// repository before a write cannot store its snapshot after it.
#[derive(Default)]
struct ActiveCache {
    generation: u64,
    chains: Option<BTreeMap<ChainId, ApprovalChain>>,
}

impl ChainStore {
    pub fn new(repository: Arc<dyn ChainRepository>) -> Self {
        Self { repository, active: RwLock::new(ActiveCache::default()) }
    }

    /// Warms the active-chain cache. Called once at startup.
    pub async fn load(&self) -> Result<usize, ApplicationError> {
        let count = self.refill().await?.len();
        info!(
            event_name = "chain.cache.loaded",
            correlation_id = "bootstrap",
            active_chains = count,
            "active chain cache loaded"
        );
        Ok(count)
    }

    async fn refill(&self) -> Result<Vec<ApprovalChain>, ApplicationError> {
        let started_at = self.active.read().await.generation;
        let chains = self.repository.list(true).await?;

        let mut cache = self.active.write().await;
        if cache.generation == started_at {
            cache.chains =
                Some(chains.iter().map(|chain| (chain.id.clone(), chain.clone())).collect());
        } else {
            debug!(
                event_name = "chain.cache.refill_discarded",
                started_at,
                generation = cache.generation,
                "chain write raced the cache refill"
            );
        }
        Ok(chains)
    }

    pub async fn create(&self, draft: ChainDraft) -> Result<ApprovalChain, ApplicationError> {
        let chain = build_chain(draft, Utc::now())?;
        self.repository.insert(chain.clone()).await?;
        self.invalidate().await;

        info!(
            event_name = "chain.created",
            chain_id = %chain.id,
            step_count = chain.steps.len(),
            is_active = chain.is_active,
            "approval chain created"
        );
        Ok(chain)
    }

    /// Active chains come from the cache, refilling it if a write dropped it.
    pub async fn list(&self, active_only: bool) -> Result<Vec<ApprovalChain>, ApplicationError> {
        if !active_only {
            return Ok(self.repository.list(false).await?);
        }

        if let Some(active) = self.active.read().await.chains.as_ref() {
            return Ok(sorted(active.values().cloned().collect()));
        }

        Ok(sorted(self.refill().await?))
    }

    pub async fn find(&self, id: &ChainId) -> Result<ApprovalChain, ApplicationError> {
        let cache = self.active.read().await;
        if let Some(chain) = cache.chains.as_ref().and_then(|cached| cached.get(id)) {
            return Ok(chain.clone());
        }
        drop(cache);

        self.repository
            .find(id)
            .await?
            .ok_or_else(|| DomainError::ChainNotFound(id.clone()).into())
    }

    pub async fn set_active(
        &self,
        id: &ChainId,
        is_active: bool,
    ) -> Result<ApprovalChain, ApplicationError> {
        let updated = self.repository.set_active(id, is_active).await?;
        self.invalidate().await;

        let chain = updated.ok_or_else(|| DomainError::ChainNotFound(id.clone()))?;
        info!(
            event_name = "chain.active_changed",
            chain_id = %id,
            is_active,
            "chain activation changed"
        );
        Ok(chain)
    }

    pub async fn delete(&self, id: &ChainId) -> Result<(), ApplicationError> {
        let outcome = self.repository.delete_if_idle(id).await?;
        match outcome {
            ChainDeleteOutcome::Deleted => {
                self.invalidate().await;
                info!(event_name = "chain.deleted", chain_id = %id, "approval chain deleted");
                Ok(())
            }
            ChainDeleteOutcome::NotFound => Err(DomainError::ChainNotFound(id.clone()).into()),
            ChainDeleteOutcome::HasOpenRequests => {
                Err(DomainError::HasOpenRequests(id.clone()).into())
            }
        }
    }

    pub async fn invalidate(&self) {
        let mut cache = self.active.write().await;
        cache.generation += 1;
        cache.chains = None;
    }

    pub async fn is_cached(&self) -> bool {
        self.active.read().await.chains.is_some()
    }
}

fn sorted(mut chains: Vec<ApprovalChain>) -> Vec<ApprovalChain> {
    chains.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    chains
}
