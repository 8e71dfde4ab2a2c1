//! Serializes verification attempts per deployment and drives the storage
//! backends once the external matcher has produced its result.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::{Address, B256};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};
use vouch_domain::{checksum_address, CompiledContract, Match, VerificationStatus};

use crate::config::VouchConfig;
use crate::error::VerificationError;
use crate::provision::{SolcProvisioner, VyperProvisioner};
use crate::relational::RelationalStore;
use crate::repository::RepositoryStore;

/// Width of the concurrent download batches used by the startup prewarm.
const PREWARM_BATCH: usize = 8;

/// The transaction that deployed a contract, as discovered by the chain
/// abstraction.
#[derive(Clone, Debug)]
pub struct CreatorTx {
    pub hash: B256,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub deployer: Option<Address>,
}

/// The engine's view of the external chain abstraction: creator-transaction
/// discovery only. The RPC machinery behind it lives outside this crate.
pub trait ChainApi: Send + Sync {
    fn find_creator_tx(
        &self,
        chain_id: u64,
        address: &Address,
    ) -> impl Future<Output = Result<Option<CreatorTx>>> + Send;
}

/// A chain abstraction that knows nothing; creator transactions stay absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoChain;

impl ChainApi for NoChain {
    fn find_creator_tx(
        &self,
        _chain_id: u64,
        _address: &Address,
    ) -> impl Future<Output = Result<Option<CreatorTx>>> + Send {
        std::future::ready(Ok(None))
    }
}

/// What a completed verification did.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub stored_repository: bool,
    pub stored_relational: bool,
}

/// Outcome of a compiler-cache prewarm run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PrewarmSummary {
    pub requested: usize,
    pub provisioned: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Removes its key from the active set on every exit path.
struct ActiveGuard {
    set: ActiveSet,
    key: String,
}

impl ActiveGuard {
    fn acquire(set: &ActiveSet, key: String) -> Option<Self> {
        let mut active = set.lock().unwrap_or_else(PoisonError::into_inner);
        if active.insert(key.clone()) {
            Some(Self {
                set: Arc::clone(set),
                key,
            })
        } else {
            None
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.key);
    }
}

pub struct VerificationCoordinator<C> {
    chain: C,
    repository: RepositoryStore,
    relational: RelationalStore,
    solc: SolcProvisioner,
    vyper: VyperProvisioner,
    active: ActiveSet,
}

impl<C: ChainApi> VerificationCoordinator<C> {
    pub fn new(config: &VouchConfig, chain: C) -> Result<Self> {
        Ok(Self {
            chain,
            repository: RepositoryStore::new(config)?,
            relational: RelationalStore::new(config),
            solc: SolcProvisioner::new(config)?,
            vyper: VyperProvisioner::new(config)?,
            active: Arc::default(),
        })
    }

    #[must_use]
    pub fn repository(&self) -> &RepositoryStore {
        &self.repository
    }

    #[must_use]
    pub fn relational(&self) -> &RelationalStore {
        &self.relational
    }

    #[must_use]
    pub fn solc(&self) -> &SolcProvisioner {
        &self.solc
    }

    #[must_use]
    pub fn vyper(&self) -> &VyperProvisioner {
        &self.vyper
    }

    /// Run one verification for a deployment, with at most one in flight per
    /// (chain, address) at any time.
    ///
    /// `produce` runs the external matcher and yields its result; a second
    /// call for the same deployment fails fast with `AlreadyBeingVerified`
    /// before `produce` is invoked. The guard key is released on success and
    /// failure alike.
    pub async fn verify_deployed<F, Fut>(
        &self,
        chain_id: u64,
        address: Address,
        produce: F,
    ) -> Result<VerificationOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(CompiledContract, Match)>>,
    {
        let key = format!("{chain_id}:{}", checksum_address(&address));
        let _guard = ActiveGuard::acquire(&self.active, key).ok_or(
            VerificationError::AlreadyBeingVerified { chain_id, address },
        )?;

        let (contract, mut verified) = produce().await?;
        if verified.creator_tx_hash.is_none() {
            self.discover_creator_tx(chain_id, &address, &mut verified)
                .await;
        }

        let status = self.repository.store_match(&contract, &verified).await?;
        let mut outcome = VerificationOutcome {
            status,
            stored_repository: status != VerificationStatus::ExtraFileInputBug,
            stored_relational: false,
        };
        if status != VerificationStatus::ExtraFileInputBug {
            outcome.stored_relational = self.relational.store_match(&contract, &verified)?;
        }
        info!(chain_id, %address, status = ?status, "verification stored");
        Ok(outcome)
    }

    /// Creator-transaction discovery is an enrichment, not a requirement:
    /// any failure is logged and treated as absence.
    async fn discover_creator_tx(&self, chain_id: u64, address: &Address, verified: &mut Match) {
        match self.chain.find_creator_tx(chain_id, address).await {
            Ok(Some(creator)) => {
                verified.creator_tx_hash = Some(creator.hash);
                let context = verified.deployment.get_or_insert_with(Default::default);
                if context.deployer.is_none() {
                    context.deployer = creator.deployer;
                }
                if context.block_number.is_none() {
                    context.block_number = creator.block_number;
                }
                if context.transaction_index.is_none() {
                    context.transaction_index = creator.transaction_index;
                }
            }
            Ok(None) => debug!(chain_id, %address, "no creator transaction found"),
            Err(err) => {
                warn!(chain_id, %address, %err,
                    "creator transaction discovery failed; continuing without it");
            }
        }
    }

    /// Download every compiler version the vendor index knows, in bounded
    /// concurrent batches, so per-request compilation rarely pays
    /// first-download latency.
    pub async fn prewarm_compilers(&self) -> PrewarmSummary {
        let versions = match self.solc.list_versions().await {
            Ok(versions) => versions,
            Err(err) => {
                warn!(%err, "could not list compiler versions; skipping prewarm");
                return PrewarmSummary {
                    errors: vec![err.to_string()],
                    ..PrewarmSummary::default()
                };
            }
        };
        let mut summary = PrewarmSummary {
            requested: versions.len(),
            ..PrewarmSummary::default()
        };
        for chunk in versions.chunks(PREWARM_BATCH) {
            let results = futures::future::join_all(
                chunk.iter().map(|version| self.solc.ensure_version(version)),
            )
            .await;
            for (version, result) in chunk.iter().zip(results) {
                match result {
                    Ok(()) => summary.provisioned += 1,
                    Err(err) => {
                        summary.failed += 1;
                        summary.errors.push(format!("{version}: {err:#}"));
                    }
                }
            }
        }
        info!(
            requested = summary.requested,
            provisioned = summary.provisioned,
            failed = summary.failed,
            "compiler prewarm finished"
        );
        summary
    }
}
