//! Normalization of raw provider payloads into the relational tables.
//!
//! Transactions upsert on their hash (last-write-wins on mutable fields),
//! positions upsert on `(address, token, protocol)` — concurrent writers
//! converge instead of duplicating rows.

use anyhow::Result;
use chrono::DateTime;
use rusqlite::Connection;
use std::collections::BTreeSet;

use common::chain::{RawTokenBalance, RawTransfer};
use common::types::{Position, Transaction};

fn parse_hex_i64(s: &str) -> Option<i64> {
    i64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Fold a hex quantity of arbitrary width into an f64. Precision loss past
/// 2^53 is acceptable — balances feed heuristics, not accounting.
fn hex_quantity_to_f64(s: &str) -> Option<f64> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return None;
    }
    let mut acc = 0.0f64;
    for c in digits.chars() {
        acc = acc * 16.0 + f64::from(c.to_digit(16)?);
    }
    Some(acc)
}

fn parse_block_timestamp(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

/// Normalize one raw transfer. Returns None when the entry has no hash or no
/// parsable block timestamp — nothing useful can be keyed off it.
pub fn transaction_from_transfer(address: &str, transfer: &RawTransfer) -> Option<Transaction> {
    let hash = transfer.hash.as_deref().filter(|h| !h.is_empty())?;
    let timestamp = transfer
        .metadata
        .as_ref()
        .and_then(|m| m.block_timestamp.as_deref())
        .and_then(parse_block_timestamp)?;

    let mut contracts = BTreeSet::new();
    if let Some(contract) = transfer
        .raw_contract
        .as_ref()
        .and_then(|c| c.address.as_deref())
    {
        if !contract.is_empty() {
            contracts.insert(contract.to_ascii_lowercase());
        }
    }
    if let Some(to) = transfer.to.as_deref() {
        if !to.is_empty() {
            contracts.insert(to.to_ascii_lowercase());
        }
    }

    Some(Transaction {
        hash: hash.to_string(),
        address: address.to_string(),
        block_number: transfer.block_num.as_deref().and_then(parse_hex_i64),
        timestamp,
        gas_cost_usd: transfer.metadata.as_ref().and_then(|m| m.gas_used_usd),
        tx_type: transfer.category.clone(),
        contracts_involved: contracts.into_iter().collect(),
        transfer_value: transfer.value,
    })
}

/// Upsert normalized transactions from one page of transfers. Returns the
/// number of rows written (inserted or overwritten).
pub fn upsert_transfers(
    conn: &Connection,
    address: &str,
    transfers: &[RawTransfer],
) -> Result<u64> {
    let mut written = 0u64;
    for transfer in transfers {
        let Some(tx) = transaction_from_transfer(address, transfer) else {
            continue;
        };
        let contracts_json = serde_json::to_string(&tx.contracts_involved)?;
        let raw_json = serde_json::to_string(transfer)?;
        let changed = conn.execute(
            "INSERT INTO transactions
                (hash, address, block_number, timestamp, gas_cost_usd, tx_type,
                 contracts_involved, transfer_value, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(hash) DO UPDATE SET
                block_number = excluded.block_number,
                timestamp = excluded.timestamp,
                gas_cost_usd = excluded.gas_cost_usd,
                tx_type = excluded.tx_type,
                contracts_involved = excluded.contracts_involved,
                transfer_value = excluded.transfer_value,
                raw_json = excluded.raw_json",
            rusqlite::params![
                tx.hash,
                tx.address,
                tx.block_number,
                tx.timestamp,
                tx.gas_cost_usd,
                tx.tx_type,
                contracts_json,
                tx.transfer_value,
                raw_json,
            ],
        )?;
        written += changed as u64;
    }
    Ok(written)
}

/// Normalize one raw token balance into a position snapshot row.
pub fn position_from_balance(
    address: &str,
    balance: &RawTokenBalance,
    observed_at: i64,
) -> Option<Position> {
    let token = balance
        .contract_address
        .as_deref()
        .filter(|t| !t.is_empty())?;
    let amount = balance
        .token_balance
        .as_deref()
        .and_then(hex_quantity_to_f64)
        .unwrap_or(0.0);
    Some(Position {
        address: address.to_string(),
        token: token.to_ascii_lowercase(),
        protocol: None,
        balance: amount,
        // Balance endpoints carry no pricing; a separate enrichment pass may
        // fill this in later.
        usd_value: None,
        observed_at,
    })
}

/// Upsert current positions; the latest observation overwrites the prior one
/// for the same `(address, token, protocol)`.
pub fn upsert_balances(
    conn: &Connection,
    address: &str,
    balances: &[RawTokenBalance],
    observed_at: i64,
) -> Result<u64> {
    let mut written = 0u64;
    for balance in balances {
        let Some(position) = position_from_balance(address, balance, observed_at) else {
            continue;
        };
        let raw_json = serde_json::to_string(balance)?;
        let changed = conn.execute(
            "INSERT INTO positions
                (address, token, protocol, balance, usd_value, observed_at, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(address, token, protocol) DO UPDATE SET
                balance = excluded.balance,
                usd_value = excluded.usd_value,
                observed_at = excluded.observed_at,
                raw_json = excluded.raw_json",
            rusqlite::params![
                position.address,
                position.token,
                position.protocol.clone().unwrap_or_default(),
                position.balance,
                position.usd_value,
                position.observed_at,
                raw_json,
            ],
        )?;
        written += changed as u64;
    }
    Ok(written)
}

/// All normalized transactions for an address, oldest first.
pub fn load_transactions(conn: &Connection, address: &str) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT hash, address, block_number, timestamp, gas_cost_usd, tx_type,
                contracts_involved, transfer_value
         FROM transactions WHERE address = ?1 ORDER BY timestamp, hash",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address], |row| {
            let contracts_json: Option<String> = row.get(6)?;
            Ok(Transaction {
                hash: row.get(0)?,
                address: row.get(1)?,
                block_number: row.get(2)?,
                timestamp: row.get(3)?,
                gas_cost_usd: row.get(4)?,
                tx_type: row.get(5)?,
                contracts_involved: contracts_json
                    .and_then(|j| serde_json::from_str(&j).ok())
                    .unwrap_or_default(),
                transfer_value: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All current positions for an address.
pub fn load_positions(conn: &Connection, address: &str) -> Result<Vec<Position>> {
    let mut stmt = conn.prepare(
        "SELECT address, token, protocol, balance, usd_value, observed_at
         FROM positions WHERE address = ?1 ORDER BY token, protocol",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address], |row| {
            let protocol: String = row.get(2)?;
            Ok(Position {
                address: row.get(0)?,
                token: row.get(1)?,
                protocol: (!protocol.is_empty()).then_some(protocol),
                balance: row.get(3)?,
                usd_value: row.get(4)?,
                observed_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
