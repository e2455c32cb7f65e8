//! Database schema.

use rusqlite::Connection;

use crate::error::StorageError;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Create all tables and the settings row (idempotent).
pub fn init(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO global_settings (id, db_version) VALUES (0, ?1)",
        [SCHEMA_VERSION],
    )?;
    migrate(conn)
}

/// Run migrations from the stored version to the latest. Version 1 is the
/// initial schema; this is the hook for future revisions.
fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let version: i64 =
        conn.query_row("SELECT db_version FROM global_settings", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StorageError::Corruption(format!(
            "database version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }
    conn.execute("UPDATE global_settings SET db_version=?1", [SCHEMA_VERSION])?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Single-row process-wide settings; holds the consensus resume cursor.
CREATE TABLE IF NOT EXISTS global_settings (
    id INTEGER PRIMARY KEY NOT NULL DEFAULT 0 CHECK (id = 0),
    db_version INTEGER NOT NULL,
    contracts_last_processed_change BLOB,       -- 32 bytes, NULL until first change
    contracts_height INTEGER NOT NULL DEFAULT 0
);

-- Applied blocks. Deleted on revert.
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id BLOB UNIQUE NOT NULL,              -- 32 bytes
    height INTEGER UNIQUE NOT NULL,
    date_created INTEGER NOT NULL               -- unix seconds
);

-- Contracts awaiting maturation. Removed by the expiry sweep.
CREATE TABLE IF NOT EXISTS active_contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_id BLOB UNIQUE NOT NULL,           -- 32 bytes
    block_id INTEGER NOT NULL REFERENCES blocks(id),
    proof_block_id INTEGER REFERENCES blocks(id),
    valid_payout_value BLOB NOT NULL,           -- 16 bytes, little-endian
    missed_payout_value BLOB NOT NULL,
    initial_valid_payout_value BLOB NOT NULL,
    initial_missed_payout_value BLOB NOT NULL,
    initial_valid_revenue BLOB NOT NULL,
    initial_missed_revenue BLOB NOT NULL,
    expiration_height INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS active_contracts_expiration_height ON active_contracts(expiration_height);
CREATE INDEX IF NOT EXISTS active_contracts_block_id ON active_contracts(block_id);
CREATE INDEX IF NOT EXISTS active_contracts_proof_block_id ON active_contracts(proof_block_id);

-- Hourly running totals. Rows are upserted in place, never deleted.
CREATE TABLE IF NOT EXISTS hourly_contract_stats (
    date_created INTEGER PRIMARY KEY,           -- unix seconds, hour boundary
    active_contracts INTEGER NOT NULL,
    valid_contracts INTEGER NOT NULL,
    missed_contracts INTEGER NOT NULL,
    total_payouts_sc BLOB NOT NULL,
    total_payouts_usd TEXT NOT NULL,
    total_payouts_eur TEXT NOT NULL,
    total_payouts_btc TEXT NOT NULL,
    estimated_revenue_sc BLOB NOT NULL,
    estimated_revenue_usd TEXT NOT NULL,
    estimated_revenue_eur TEXT NOT NULL,
    estimated_revenue_btc TEXT NOT NULL
);

-- Exchange rates per native coin.
CREATE TABLE IF NOT EXISTS market_data (
    date_created INTEGER PRIMARY KEY,           -- unix seconds
    usd_rate TEXT NOT NULL,
    eur_rate TEXT NOT NULL,
    btc_rate TEXT NOT NULL
);
"#;
