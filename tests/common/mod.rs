//! Shared test utilities: a deterministic in-memory chain that feeds
//! consensus changes to a subscriber, plus market-data seeding.

#![allow(dead_code)]

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};

use revenued::chain::{
    AppliedDiffs, Block, CoinInput, CoinOutput, CoinOutputDiff, ConsensusChange,
    ConsensusSubscriber, ContractRevision, DiffDirection, StorageContract, StorageProof,
    Transaction,
};
use revenued::storage::Store;
use revenued::types::{ContractId, Currency, Hash256, OutputId};

/// Spacing between test block timestamps.
pub const BLOCK_INTERVAL_MINS: i64 = 10;

/// Timestamp of the first test block.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

/// A timestamp safely after everything a test chain produces.
pub fn far_future() -> DateTime<Utc> {
    base_time() + Duration::days(365)
}

/// Seed one exchange-rate point at the base time so maturation always finds
/// a rate. usd=2, eur=3, btc=4 keeps expected fiat values easy to derive.
pub fn seed_market_data(store: &Store) {
    store
        .add_market_data(
            BigDecimal::from(2),
            BigDecimal::from(3),
            BigDecimal::from(4),
            base_time(),
        )
        .expect("seed market data");
}

/// A deterministic chain: builds consensus changes, tracks declared UTXO
/// values so applied diffs stay consistent with transactions, and can
/// reorg its tip. All ids derive from a counter, so identical scripts
/// produce identical change streams.
pub struct TestChain {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    pending_spent: Vec<(OutputId, Currency)>,
    utxo_values: HashMap<OutputId, Currency>,
    counter: u64,
    last_change_id: Option<Hash256>,
}

impl TestChain {
    pub fn new() -> Self {
        TestChain {
            blocks: Vec::new(),
            pending: Vec::new(),
            pending_spent: Vec::new(),
            utxo_values: HashMap::new(),
            counter: 0,
            last_change_id: None,
        }
    }

    /// Id of the most recently delivered consensus change.
    pub fn last_change_id(&self) -> Hash256 {
        self.last_change_id.expect("no change delivered yet")
    }

    /// Height of the current tip. Panics before the first mined block.
    pub fn tip(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    /// Timestamp the block at `height` carries.
    pub fn timestamp_at(&self, height: u64) -> DateTime<Utc> {
        base_time() + Duration::minutes(BLOCK_INTERVAL_MINS * height as i64)
    }

    fn next_hash(&mut self, tag: &str) -> Hash256 {
        self.counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.update(self.counter.to_le_bytes());
        Hash256::new(hasher.finalize().into())
    }

    /// Queue a transaction for the next mined block. `spent` declares the
    /// values of the outputs the transaction spends; they are emitted as
    /// reverted output diffs alongside the block.
    pub fn queue_transaction(&mut self, txn: Transaction, spent: Vec<(OutputId, Currency)>) {
        for (id, value) in &spent {
            self.utxo_values.insert(*id, *value);
        }
        self.pending_spent.extend(spent);
        self.pending.push(txn);
    }

    /// Queue a formation of a contract funded entirely by the renter. The
    /// proof-output vectors carry the renter leg at index 0 and the host
    /// leg at index 1.
    pub fn form_contract(
        &mut self,
        valid_host: Currency,
        missed_host: Currency,
        window_start: u64,
        window_end: u64,
    ) -> ContractId {
        let renter_leg = Currency::coins(100);
        let payout = renter_leg + valid_host;
        let contract = StorageContract {
            payout,
            valid_proof_outputs: vec![
                CoinOutput { value: renter_leg },
                CoinOutput { value: valid_host },
            ],
            missed_proof_outputs: vec![
                CoinOutput { value: renter_leg },
                CoinOutput { value: missed_host },
            ],
            window_start,
            window_end,
        };

        let funding_output = self.next_hash("utxo");
        let txn = Transaction {
            id: self.next_hash("txn"),
            coin_inputs: vec![CoinInput { parent_id: funding_output }],
            storage_contracts: vec![contract],
            ..Default::default()
        };
        let id = txn.contract_id(0);
        self.queue_transaction(txn, vec![(funding_output, payout)]);
        id
    }

    /// Queue a revision replacing a contract's host payouts. Renter legs are
    /// adjusted to keep each vector's total constant.
    pub fn revise_contract(
        &mut self,
        parent_id: ContractId,
        valid_host: Currency,
        missed_host: Currency,
    ) {
        let renter_leg = Currency::coins(100);
        let txn = Transaction {
            id: self.next_hash("txn"),
            contract_revisions: vec![ContractRevision {
                parent_id,
                revision_number: 1,
                new_valid_proof_outputs: vec![
                    CoinOutput { value: renter_leg },
                    CoinOutput { value: valid_host },
                ],
                new_missed_proof_outputs: vec![
                    CoinOutput { value: renter_leg },
                    CoinOutput { value: missed_host },
                ],
            }],
            ..Default::default()
        };
        self.queue_transaction(txn, Vec::new());
    }

    /// Queue a storage proof for a contract.
    pub fn prove_contract(&mut self, parent_id: ContractId) {
        let txn = Transaction {
            id: self.next_hash("txn"),
            storage_proofs: vec![StorageProof { parent_id }],
            ..Default::default()
        };
        self.queue_transaction(txn, Vec::new());
    }

    /// Mine `n` blocks as a single consensus change. Queued transactions
    /// land in the first block of the batch.
    pub fn mine(&mut self, subscriber: &dyn ConsensusSubscriber, n: u64) {
        assert!(n > 0, "mine at least one block");
        let start_height = self.blocks.len() as u64;

        let mut applied_blocks = Vec::with_capacity(n as usize);
        let mut applied_diffs = Vec::with_capacity(n as usize);
        for i in 0..n {
            let height = start_height + i;
            let transactions = if i == 0 { std::mem::take(&mut self.pending) } else { Vec::new() };
            let diffs = if i == 0 {
                AppliedDiffs {
                    coin_output_diffs: std::mem::take(&mut self.pending_spent)
                        .into_iter()
                        .map(|(id, value)| CoinOutputDiff {
                            direction: DiffDirection::Reverted,
                            id,
                            output: CoinOutput { value },
                        })
                        .collect(),
                }
            } else {
                AppliedDiffs::default()
            };

            let block = Block {
                id: self.next_hash("block"),
                timestamp: self.timestamp_at(height),
                transactions,
            };
            self.blocks.push(block.clone());
            applied_blocks.push(block);
            applied_diffs.push(diffs);
        }

        let change = ConsensusChange {
            id: self.next_hash("change"),
            tip_height: self.tip(),
            reverted_blocks: vec![],
            applied_blocks,
            applied_diffs,
        };
        self.last_change_id = Some(change.id);
        subscriber.process_consensus_change(&change);
    }

    /// Mine `n` blocks delivered as one consensus change each.
    pub fn mine_blocks(&mut self, subscriber: &dyn ConsensusSubscriber, n: u64) {
        for _ in 0..n {
            self.mine(subscriber, 1);
        }
    }

    /// Mine single-block changes until the tip reaches `height`.
    pub fn mine_to(&mut self, subscriber: &dyn ConsensusSubscriber, height: u64) {
        let next = self.blocks.len() as u64;
        assert!(height >= next, "tip already past {height}");
        self.mine_blocks(subscriber, height - next + 1);
    }

    /// Reorg the top `k` blocks: one consensus change reverting them
    /// (tip-first) and applying `k` equivalent blocks carrying the same
    /// transactions under fresh block ids.
    pub fn reorg(&mut self, subscriber: &dyn ConsensusSubscriber, k: usize) {
        assert!(k <= self.blocks.len(), "cannot reorg below genesis");
        let detached = self.blocks.split_off(self.blocks.len() - k);

        let mut applied_blocks = Vec::with_capacity(k);
        let mut applied_diffs = Vec::with_capacity(k);
        for old in &detached {
            let block = Block {
                id: self.next_hash("block"),
                timestamp: old.timestamp,
                transactions: old.transactions.clone(),
            };
            let diffs = AppliedDiffs {
                coin_output_diffs: block
                    .transactions
                    .iter()
                    .flat_map(|txn| &txn.coin_inputs)
                    .map(|input| CoinOutputDiff {
                        direction: DiffDirection::Reverted,
                        id: input.parent_id,
                        output: CoinOutput {
                            value: *self
                                .utxo_values
                                .get(&input.parent_id)
                                .expect("spent output was declared"),
                        },
                    })
                    .collect(),
            };
            self.blocks.push(block.clone());
            applied_blocks.push(block);
            applied_diffs.push(diffs);
        }

        let mut reverted_blocks = detached;
        reverted_blocks.reverse(); // tip first

        let change = ConsensusChange {
            id: self.next_hash("change"),
            tip_height: self.tip(),
            reverted_blocks,
            applied_blocks,
            applied_diffs,
        };
        self.last_change_id = Some(change.id);
        subscriber.process_consensus_change(&change);
    }
}
