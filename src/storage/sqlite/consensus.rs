//! Consensus indexing.
//!
//! Folds the node's consensus-change stream into the contract ledger and
//! derives the hourly statistics buckets. Each change is processed inside a
//! single transaction: either the entire change is durable or none of it is.
//! A change that cannot be committed panics; the subscription resumes from
//! the persisted cursor after restart.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::market::nearest_rate;
use super::store::Store;
use super::types::{SqlCurrency, SqlHash, SqlTime};
use crate::chain::{
    ChangeCursor, ConsensusChange, ConsensusSubscriber, DiffDirection, MATURITY_DELAY,
    StorageContract,
};
use crate::error::StorageError;
use crate::stats::{ContractState, Values, truncate_hour};
use crate::types::{BlockId, ChangeId, ContractId, Currency, OutputId};

/// A contract row as read back for the maturation pass.
#[derive(Debug, Clone)]
struct ContractRow {
    id: ContractId,
    initial_valid: Currency,
    initial_missed: Currency,
    final_valid: Currency,
    final_missed: Currency,
    initial_valid_revenue: Currency,
    initial_missed_revenue: Currency,
}

impl Store {
    /// The resume cursor persisted by the last committed change.
    pub fn last_change(&self) -> Result<ChangeCursor, StorageError> {
        self.transaction(|tx| {
            let cursor = tx
                .query_row(
                    "SELECT contracts_last_processed_change FROM global_settings",
                    [],
                    |row| row.get::<_, Option<SqlHash>>(0),
                )
                .optional()?;
            Ok(match cursor.flatten() {
                Some(h) => ChangeCursor::Change(h.0),
                None => ChangeCursor::Beginning,
            })
        })
    }

    /// Fold one consensus change into the store. Panics if the change cannot
    /// be committed; the node replays it from the cursor on restart.
    pub fn process_consensus_change(&self, cc: &ConsensusChange) {
        if let Err(err) = self.apply_consensus_change(cc) {
            tracing::error!(
                height = cc.tip_height,
                change_id = %cc.id,
                error = %err,
                "failed to process consensus change"
            );
            panic!("failed to process consensus change {}: {}", cc.id, err);
        }
    }

    fn apply_consensus_change(&self, cc: &ConsensusChange) -> Result<(), StorageError> {
        self.transaction(|tx| {
            // Stats are credited only after a payout matures, so reverting a
            // block never requires undoing a bucket: the matured view below
            // the reverted height is untouched.
            for reverted in &cc.reverted_blocks {
                revert_block(tx, reverted.id)?;
                tracing::debug!(block_id = %reverted.id, "reverted block");
            }

            // Transactions reference spent outputs by id only; their values
            // come from the batch's reverted output diffs.
            let mut spent_values: HashMap<OutputId, Currency> = HashMap::new();
            for diffs in &cc.applied_diffs {
                for diff in &diffs.coin_output_diffs {
                    if diff.direction == DiffDirection::Reverted {
                        spent_values.insert(diff.id, diff.output.value);
                    }
                }
            }

            let mut height = cc.tip_height + 1 - cc.applied_blocks.len() as u64;
            for block in &cc.applied_blocks {
                tracing::debug!(block_id = %block.id, height, "adding block");
                let block_db_id = add_block(tx, block.id, height, block.timestamp)?;

                let mut active: i64 = 0;
                for txn in &block.transactions {
                    let mut inputs = Vec::with_capacity(txn.coin_inputs.len());
                    for input in &txn.coin_inputs {
                        let value =
                            spent_values.get(&input.parent_id).copied().ok_or_else(|| {
                                StorageError::MissingSpentOutput(input.parent_id.to_string())
                            })?;
                        inputs.push(value);
                    }
                    let outputs: Vec<Currency> =
                        txn.coin_outputs.iter().map(|o| o.value).collect();
                    let fees: Currency = txn.miner_fees.iter().copied().sum();

                    for (i, fc) in txn.storage_contracts.iter().enumerate() {
                        let fc_id = txn.contract_id(i as u64);

                        // Attempt to recover the renewal revenue bundled into
                        // the host leg at formation. Best effort; failure
                        // under-counts rather than over-counts.
                        let mut initial_valid_revenue = Currency::ZERO;
                        let mut initial_missed_revenue = Currency::ZERO;
                        if fc.valid_proof_outputs.len() >= 2
                            && fc.missed_proof_outputs.len() >= 2
                            && txn.storage_contracts.len() == 1
                        {
                            let renter_target = fc.valid_proof_outputs[0].value + fees;
                            let host_target = fc.missed_proof_outputs[1].value;
                            if let Some(host_funds) =
                                estimate_host_funds(&inputs, &outputs, renter_target, host_target)
                            {
                                let (v, underflow) =
                                    fc.valid_host_payout().sub_with_underflow(host_funds);
                                if !underflow {
                                    initial_valid_revenue = v;
                                }
                                let (v, underflow) =
                                    fc.missed_host_payout().sub_with_underflow(host_funds);
                                if !underflow {
                                    initial_missed_revenue = v;
                                }
                            }
                        }

                        add_active_contract(
                            tx,
                            fc_id,
                            fc,
                            block_db_id,
                            initial_valid_revenue,
                            initial_missed_revenue,
                        )?;
                        tracing::debug!(
                            contract_id = %fc_id,
                            expiration_height = fc.window_end,
                            "added active contract"
                        );
                        active += 1;
                    }

                    for fcr in &txn.contract_revisions {
                        revise_contract(
                            tx,
                            fcr.parent_id,
                            fcr.new_valid_host_payout(),
                            fcr.new_missed_host_payout(),
                        )?;
                        tracing::debug!(contract_id = %fcr.parent_id, "revised contract");
                    }

                    for proof in &txn.storage_proofs {
                        prove_contract(tx, proof.parent_id, block_db_id)?;
                        tracing::debug!(contract_id = %proof.parent_id, "proved contract");
                    }
                }

                let mut valid: i64 = 0;
                let mut missed: i64 = 0;
                let mut total_revenue = Values::default();
                let mut total_payout = Values::default();
                if height > MATURITY_DELAY {
                    let (usd, eur, btc) = nearest_rate(tx, block.timestamp)?;
                    let matured_height = height - MATURITY_DELAY;
                    tracing::debug!(matured_height, "crediting matured contracts");

                    let expired = missed_contracts(tx, matured_height)?;
                    missed = expired.len() as i64;
                    for c in &expired {
                        // revenue from revisions, plus the estimated renewal
                        // revenue already embedded in the initial payout
                        let revenue_sc = c.final_missed.saturating_sub(c.initial_missed)
                            + c.initial_missed_revenue;
                        let revenue = denominate(revenue_sc, &usd, &eur, &btc);
                        total_revenue = total_revenue.add(&revenue);

                        // the payout series carries the contract's valid
                        // ceiling even when the proof was missed
                        let payout = denominate(c.final_valid, &usd, &eur, &btc);
                        total_payout = total_payout.add(&payout);

                        tracing::debug!(
                            contract_id = %c.id,
                            payout = %c.final_valid,
                            revenue = %revenue_sc,
                            "missed contract"
                        );
                    }

                    let proven = valid_contracts(tx, matured_height)?;
                    valid = proven.len() as i64;
                    for c in &proven {
                        let revenue_sc = c.final_valid.saturating_sub(c.initial_valid)
                            + c.initial_valid_revenue;
                        let revenue = denominate(revenue_sc, &usd, &eur, &btc);
                        total_revenue = total_revenue.add(&revenue);

                        let payout = denominate(c.final_valid, &usd, &eur, &btc);
                        total_payout = total_payout.add(&payout);

                        tracing::debug!(
                            contract_id = %c.id,
                            payout = %c.final_valid,
                            revenue = %revenue_sc,
                            "valid contract"
                        );
                    }
                }

                update_contract_stats(
                    tx,
                    active - valid - missed,
                    valid,
                    missed,
                    &total_revenue,
                    &total_payout,
                    block.timestamp,
                )?;

                height += 1;
                tracing::debug!(block_id = %block.id, "applied block");
            }

            if cc.tip_height > MATURITY_DELAY {
                delete_expired(tx, cc.tip_height - MATURITY_DELAY)?;
            }

            set_last_change(tx, cc.id, cc.tip_height)?;
            Ok(())
        })
    }
}

impl ConsensusSubscriber for Store {
    fn process_consensus_change(&self, change: &ConsensusChange) {
        Store::process_consensus_change(self, change)
    }

    fn last_change(&self) -> Result<ChangeCursor, StorageError> {
        Store::last_change(self)
    }
}

fn denominate(sc: Currency, usd: &BigDecimal, eur: &BigDecimal, btc: &BigDecimal) -> Values {
    let coins = sc.to_decimal();
    Values {
        sc,
        usd: &coins * usd,
        eur: &coins * eur,
        btc: &coins * btc,
    }
}

fn sum(values: &[Currency]) -> Currency {
    values.iter().copied().sum()
}

/// Search for a split of a formation transaction's inputs and outputs into
/// a renter part and a host part, using the parties' expected funding as a
/// guide. The renter leg must clear more than its payout plus fees (it also
/// pays the contract fee), and the host leg must clear less than the host
/// missed payout (the fee it receives is someone else's money). Returns the
/// host's net funding for the first split satisfying both.
fn estimate_host_funds(
    inputs: &[Currency],
    outputs: &[Currency],
    renter_target: Currency,
    host_target: Currency,
) -> Option<Currency> {
    for i in 0..inputs.len() {
        let (renter_in, host_in) = (sum(&inputs[..i]), sum(&inputs[i..]));

        for j in (0..=outputs.len()).rev() {
            let (renter_out, host_out) = (sum(&outputs[..j]), sum(&outputs[j..]));

            if renter_in < renter_out || host_in < host_out {
                continue;
            }
            let renter_net = renter_in.saturating_sub(renter_out);
            let host_net = host_in.saturating_sub(host_out);
            if renter_net <= renter_target || host_net >= host_target {
                continue;
            }
            return Some(host_net);
        }
    }
    None
}

fn set_last_change(
    tx: &rusqlite::Transaction<'_>,
    id: ChangeId,
    height: u64,
) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE global_settings SET contracts_last_processed_change=?1, contracts_height=?2",
        params![SqlHash(id), height as i64],
    )?;
    Ok(())
}

fn revert_block(tx: &rusqlite::Transaction<'_>, block_id: BlockId) -> Result<(), StorageError> {
    let block_db_id: i64 = tx.query_row(
        "SELECT id FROM blocks WHERE block_id=?1",
        [SqlHash(block_id)],
        |row| row.get(0),
    )?;

    // clear proof references before the block row goes away
    tx.execute(
        "UPDATE active_contracts SET proof_block_id=NULL WHERE proof_block_id=?1",
        [block_db_id],
    )?;
    tx.execute("DELETE FROM active_contracts WHERE block_id=?1", [block_db_id])?;
    tx.execute("DELETE FROM blocks WHERE id=?1", [block_db_id])?;
    Ok(())
}

fn add_block(
    tx: &rusqlite::Transaction<'_>,
    block_id: BlockId,
    height: u64,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let id = tx.query_row(
        "INSERT INTO blocks (block_id, height, date_created) VALUES (?1, ?2, ?3) RETURNING id",
        params![SqlHash(block_id), height as i64, SqlTime(timestamp)],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn add_active_contract(
    tx: &rusqlite::Transaction<'_>,
    id: ContractId,
    fc: &StorageContract,
    block_db_id: i64,
    initial_valid_revenue: Currency,
    initial_missed_revenue: Currency,
) -> Result<(), StorageError> {
    let initial_valid = fc.valid_host_payout();
    let initial_missed = fc.missed_host_payout();
    let expiration_height = fc.window_end.min(i64::MAX as u64) as i64;

    tx.execute(
        "INSERT INTO active_contracts (contract_id, block_id, valid_payout_value,
missed_payout_value, initial_valid_payout_value, initial_missed_payout_value,
initial_valid_revenue, initial_missed_revenue, expiration_height)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            SqlHash(id),
            block_db_id,
            SqlCurrency(initial_valid),
            SqlCurrency(initial_missed),
            SqlCurrency(initial_valid),
            SqlCurrency(initial_missed),
            SqlCurrency(initial_valid_revenue),
            SqlCurrency(initial_missed_revenue),
            expiration_height
        ],
    )?;
    Ok(())
}

fn revise_contract(
    tx: &rusqlite::Transaction<'_>,
    id: ContractId,
    valid_payout: Currency,
    missed_payout: Currency,
) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE active_contracts SET valid_payout_value=?1, missed_payout_value=?2
WHERE contract_id=?3",
        params![SqlCurrency(valid_payout), SqlCurrency(missed_payout), SqlHash(id)],
    )?;
    Ok(())
}

fn prove_contract(
    tx: &rusqlite::Transaction<'_>,
    id: ContractId,
    block_db_id: i64,
) -> Result<(), StorageError> {
    // a proof for an unknown contract is tolerated; the node is authoritative
    tx.execute(
        "UPDATE active_contracts SET proof_block_id=?1 WHERE contract_id=?2",
        params![block_db_id, SqlHash(id)],
    )?;
    Ok(())
}

fn delete_expired(tx: &rusqlite::Transaction<'_>, height: u64) -> Result<(), StorageError> {
    tx.execute(
        "DELETE FROM active_contracts WHERE expiration_height <= ?1",
        [height as i64],
    )?;
    tx.execute(
        "DELETE FROM active_contracts WHERE proof_block_id IN
(SELECT id FROM blocks WHERE height <= ?1)",
        [height as i64],
    )?;
    Ok(())
}

const CONTRACT_COLUMNS: &str = "c.contract_id, c.initial_valid_payout_value,
c.initial_missed_payout_value, c.valid_payout_value, c.missed_payout_value,
c.initial_valid_revenue, c.initial_missed_revenue";

fn scan_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractRow> {
    Ok(ContractRow {
        id: row.get::<_, SqlHash>(0)?.0,
        initial_valid: row.get::<_, SqlCurrency>(1)?.0,
        initial_missed: row.get::<_, SqlCurrency>(2)?.0,
        final_valid: row.get::<_, SqlCurrency>(3)?.0,
        final_missed: row.get::<_, SqlCurrency>(4)?.0,
        initial_valid_revenue: row.get::<_, SqlCurrency>(5)?.0,
        initial_missed_revenue: row.get::<_, SqlCurrency>(6)?.0,
    })
}

/// Active contracts whose proof window ended at or below `height` without a
/// storage proof.
fn missed_contracts(
    tx: &rusqlite::Transaction<'_>,
    height: u64,
) -> Result<Vec<ContractRow>, StorageError> {
    let query = format!(
        "SELECT {CONTRACT_COLUMNS} FROM active_contracts c
WHERE c.expiration_height <= ?1 AND c.proof_block_id IS NULL"
    );
    let mut stmt = tx.prepare(&query)?;
    let rows = stmt
        .query_map([height as i64], scan_contract)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Active contracts whose storage proof landed at or below `height`.
fn valid_contracts(
    tx: &rusqlite::Transaction<'_>,
    height: u64,
) -> Result<Vec<ContractRow>, StorageError> {
    let query = format!(
        "SELECT {CONTRACT_COLUMNS} FROM active_contracts c
INNER JOIN blocks pb ON c.proof_block_id=pb.id
WHERE pb.height <= ?1"
    );
    let mut stmt = tx.prepare(&query)?;
    let rows = stmt
        .query_map([height as i64], scan_contract)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The latest hourly bucket at or before `timestamp`, or the zero state.
pub(crate) fn get_metrics(
    tx: &rusqlite::Transaction<'_>,
    timestamp: DateTime<Utc>,
) -> Result<ContractState, StorageError> {
    let state = tx
        .query_row(
            "SELECT active_contracts, valid_contracts, missed_contracts,
total_payouts_sc, total_payouts_usd, total_payouts_eur, total_payouts_btc,
estimated_revenue_sc, estimated_revenue_usd, estimated_revenue_eur, estimated_revenue_btc
FROM hourly_contract_stats
WHERE date_created <= ?1
ORDER BY date_created DESC
LIMIT 1",
            [SqlTime(timestamp)],
            |row| scan_contract_state(row, timestamp),
        )
        .optional()?;
    Ok(state.unwrap_or(ContractState { timestamp, ..Default::default() }))
}

pub(crate) fn scan_contract_state(
    row: &rusqlite::Row<'_>,
    timestamp: DateTime<Utc>,
) -> rusqlite::Result<ContractState> {
    use super::types::SqlDecimal;
    Ok(ContractState {
        active: row.get(0)?,
        valid: row.get(1)?,
        missed: row.get(2)?,
        payout: Values {
            sc: row.get::<_, SqlCurrency>(3)?.0,
            usd: row.get::<_, SqlDecimal>(4)?.0,
            eur: row.get::<_, SqlDecimal>(5)?.0,
            btc: row.get::<_, SqlDecimal>(6)?.0,
        },
        revenue: Values {
            sc: row.get::<_, SqlCurrency>(7)?.0,
            usd: row.get::<_, SqlDecimal>(8)?.0,
            eur: row.get::<_, SqlDecimal>(9)?.0,
            btc: row.get::<_, SqlDecimal>(10)?.0,
        },
        timestamp,
    })
}

/// Rebase the running totals from the most recent bucket at or before
/// `timestamp`, add the deltas, and upsert the row for `timestamp`'s hour.
fn update_contract_stats(
    tx: &rusqlite::Transaction<'_>,
    active: i64,
    valid: i64,
    missed: i64,
    revenue: &Values,
    payout: &Values,
    timestamp: DateTime<Utc>,
) -> Result<(), StorageError> {
    if active == 0 && valid == 0 && missed == 0 {
        return Ok(());
    }

    let mut state = get_metrics(tx, timestamp)?;
    state.active += active;
    state.valid += valid;
    state.missed += missed;
    state.revenue = state.revenue.add(revenue);
    state.payout = state.payout.add(payout);

    if state.active < 0 {
        return Err(StorageError::Corruption(format!(
            "invalid active contract count: {}",
            state.active
        )));
    } else if state.valid < 0 {
        return Err(StorageError::Corruption(format!(
            "invalid valid contract count: {}",
            state.valid
        )));
    } else if state.missed < 0 {
        return Err(StorageError::Corruption(format!(
            "invalid missed contract count: {}",
            state.missed
        )));
    }

    use super::types::SqlDecimal;
    tx.execute(
        "INSERT INTO hourly_contract_stats (date_created, active_contracts,
valid_contracts, missed_contracts, total_payouts_sc, total_payouts_usd,
total_payouts_eur, total_payouts_btc, estimated_revenue_sc,
estimated_revenue_usd, estimated_revenue_eur, estimated_revenue_btc)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT (date_created) DO UPDATE SET active_contracts=EXCLUDED.active_contracts,
valid_contracts=EXCLUDED.valid_contracts, missed_contracts=EXCLUDED.missed_contracts,
total_payouts_sc=EXCLUDED.total_payouts_sc, total_payouts_usd=EXCLUDED.total_payouts_usd,
total_payouts_eur=EXCLUDED.total_payouts_eur, total_payouts_btc=EXCLUDED.total_payouts_btc,
estimated_revenue_sc=EXCLUDED.estimated_revenue_sc, estimated_revenue_usd=EXCLUDED.estimated_revenue_usd,
estimated_revenue_eur=EXCLUDED.estimated_revenue_eur, estimated_revenue_btc=EXCLUDED.estimated_revenue_btc",
        params![
            SqlTime(truncate_hour(timestamp)),
            state.active,
            state.valid,
            state.missed,
            SqlCurrency(state.payout.sc),
            SqlDecimal(state.payout.usd),
            SqlDecimal(state.payout.eur),
            SqlDecimal(state.payout.btc),
            SqlCurrency(state.revenue.sc),
            SqlDecimal(state.revenue.usd),
            SqlDecimal(state.revenue.eur),
            SqlDecimal(state.revenue.btc),
        ],
    )?;
    Ok(())
}
