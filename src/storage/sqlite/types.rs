//! SQL column wrappers for crate value types.
//!
//! Currencies are 16-byte little-endian blobs, hashes 32-byte blobs,
//! timestamps unix seconds, and decimals their exact text rendering.

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::types::{Currency, Hash256};

pub(crate) struct SqlCurrency(pub Currency);

impl ToSql for SqlCurrency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_le_bytes().to_vec()))
    }
}

impl FromSql for SqlCurrency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 16] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 16,
            blob_size: blob.len(),
        })?;
        Ok(SqlCurrency(Currency::from_le_bytes(bytes)))
    }
}

pub(crate) struct SqlHash(pub Hash256);

impl ToSql for SqlHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_bytes().to_vec()))
    }
}

impl FromSql for SqlHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 32] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 32,
            blob_size: blob.len(),
        })?;
        Ok(SqlHash(Hash256::new(bytes)))
    }
}

pub(crate) struct SqlTime(pub DateTime<Utc>);

impl ToSql for SqlTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp()))
    }
}

impl FromSql for SqlTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let secs = value.as_i64()?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(SqlTime)
            .ok_or(FromSqlError::OutOfRange(secs))
    }
}

pub(crate) struct SqlDecimal(pub BigDecimal);

impl ToSql for SqlDecimal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}

impl FromSql for SqlDecimal {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map(SqlDecimal)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
