//! Consensus-stream data model.
//!
//! The chain node runs out of process and publishes consensus changes:
//! batches of reverted blocks followed by applied blocks describing the
//! delta between one tip and the next. This module defines that wire model
//! and the subscriber seam the indexer implements; [`node`] carries the
//! transport.

pub mod node;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{BlockId, ChangeId, ContractId, Currency, OutputId, TransactionId};

/// Number of blocks between a payout's determination and its spendability.
/// Revenue is credited at maturation, not at the contract-defining block.
pub const MATURITY_DELAY: u64 = 144;

/// Timestamp of the network's genesis block. Floor for the market-data
/// backfill; there is no revenue to denominate before it.
pub fn genesis_timestamp() -> DateTime<Utc> {
    Utc.timestamp_opt(1_433_600_000, 0).single().expect("valid genesis timestamp")
}

/// Resume cursor for the consensus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCursor {
    /// Stream from genesis.
    Beginning,
    /// Resume after the change with this id.
    Change(ChangeId),
}

/// A coin input, referencing the output it spends by id. The spent value is
/// recovered from the change's applied diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinInput {
    pub parent_id: OutputId,
}

/// A coin output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinOutput {
    pub value: Currency,
}

/// An on-chain storage contract. The proof-output vectors hold the renter
/// leg at index 0 and the host leg at index 1 by convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageContract {
    pub payout: Currency,
    pub valid_proof_outputs: Vec<CoinOutput>,
    pub missed_proof_outputs: Vec<CoinOutput>,
    pub window_start: u64,
    pub window_end: u64,
}

impl StorageContract {
    /// The host's payout when a timely storage proof is submitted. Zero if
    /// the contract lacks the expected two-output layout.
    pub fn valid_host_payout(&self) -> Currency {
        self.valid_proof_outputs.get(1).map_or(Currency::ZERO, |o| o.value)
    }

    /// The host's payout when the proof window lapses without a proof.
    pub fn missed_host_payout(&self) -> Currency {
        self.missed_proof_outputs.get(1).map_or(Currency::ZERO, |o| o.value)
    }
}

/// A revision replacing a contract's payout vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRevision {
    pub parent_id: ContractId,
    pub revision_number: u64,
    pub new_valid_proof_outputs: Vec<CoinOutput>,
    pub new_missed_proof_outputs: Vec<CoinOutput>,
}

impl ContractRevision {
    pub fn new_valid_host_payout(&self) -> Currency {
        self.new_valid_proof_outputs.get(1).map_or(Currency::ZERO, |o| o.value)
    }

    pub fn new_missed_host_payout(&self) -> Currency {
        self.new_missed_proof_outputs.get(1).map_or(Currency::ZERO, |o| o.value)
    }
}

/// A storage proof resolving a contract as valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProof {
    pub parent_id: ContractId,
}

/// A transaction, reduced to the fields the indexer consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(default)]
    pub coin_inputs: Vec<CoinInput>,
    #[serde(default)]
    pub coin_outputs: Vec<CoinOutput>,
    #[serde(default)]
    pub miner_fees: Vec<Currency>,
    #[serde(default)]
    pub storage_contracts: Vec<StorageContract>,
    #[serde(default)]
    pub contract_revisions: Vec<ContractRevision>,
    #[serde(default)]
    pub storage_proofs: Vec<StorageProof>,
}

impl Transaction {
    /// Deterministic id of the i-th contract declared by this transaction.
    pub fn contract_id(&self, i: u64) -> ContractId {
        let mut hasher = Sha256::new();
        hasher.update(b"storage contract id");
        hasher.update(self.id.as_bytes());
        hasher.update(i.to_le_bytes());
        ContractId::new(hasher.finalize().into())
    }
}

/// A block as published on the consensus stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Whether a diff was applied or reverted by the batch. An output diff with
/// direction `Reverted` records a UTXO that the batch spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffDirection {
    Applied,
    Reverted,
}

/// A single coin-output diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinOutputDiff {
    pub direction: DiffDirection,
    pub id: OutputId,
    pub output: CoinOutput,
}

/// The diffs produced by one applied block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppliedDiffs {
    #[serde(default)]
    pub coin_output_diffs: Vec<CoinOutputDiff>,
}

/// One consensus change: a forward edge from one tip to the next, possibly
/// crossing a reorg. Reverts are ordered tip-first, applies parent-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusChange {
    pub id: ChangeId,
    /// Chain height after applying the batch.
    pub tip_height: u64,
    #[serde(default)]
    pub reverted_blocks: Vec<Block>,
    #[serde(default)]
    pub applied_blocks: Vec<Block>,
    #[serde(default)]
    pub applied_diffs: Vec<AppliedDiffs>,
}

/// The seam between the chain node and the indexer. Processing is blocking
/// and serial: the node invokes the subscriber once per change and queues
/// further changes behind it. A change that cannot be committed panics; the
/// subscription resumes from the persisted cursor on restart.
pub trait ConsensusSubscriber: Send + Sync {
    /// Fold one consensus change into durable state.
    fn process_consensus_change(&self, change: &ConsensusChange);

    /// The resume cursor persisted by the last committed change.
    fn last_change(&self) -> Result<ChangeCursor, crate::error::StorageError>;
}
