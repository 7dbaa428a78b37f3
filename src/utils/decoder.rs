//! Transfer decoder
//! Turns explorer transaction records into normalized stablecoin transfers

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use crate::config::{Chain, Token};
use crate::utils::explorer::RawTransaction;

/// `0x` + 4-byte selector + two 32-byte words
pub const MIN_TRANSFER_INPUT_LEN: usize = 138;

const WORD_HEX_LEN: usize = 64;

/// A single token movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransfer {
    pub token: String,
    pub chain: Chain,
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub timestamp: i64,
    pub tx_hash: String,
    pub block_number: u64,
}

/// A transfer is large iff its amount is strictly above the threshold
pub fn is_large(amount: f64, threshold: f64) -> bool {
    amount > threshold
}

/// Decode a raw record into a transfer of `token` on `chain`.
///
/// Token-transfer endpoint records carry their own decimals. Plain
/// transactions are only recognized as zero-value calls to the token
/// contract whose last call-data word is the amount.
pub fn decode(raw: &RawTransaction, token: &Token, chain: Chain) -> Option<NormalizedTransfer> {
    let amount = match &raw.token_decimal {
        Some(decimals) => decode_token_record(raw, decimals),
        None => decode_call_data(raw, token, chain),
    };

    let Some(amount) = amount else {
        debug!(target: "DECODER", hash = %raw.hash, chain = %chain, "Skipping unrecognized transaction");
        return None;
    };

    let (Ok(timestamp), Ok(block_number)) = (
        raw.time_stamp.trim().parse::<i64>(),
        raw.block_number.trim().parse::<u64>(),
    ) else {
        debug!(target: "DECODER", hash = %raw.hash, "Skipping transaction with bad timestamp or block");
        return None;
    };

    Some(NormalizedTransfer {
        token: token.symbol.clone(),
        chain,
        from: raw.from.clone(),
        to: raw.to.clone(),
        amount,
        timestamp,
        tx_hash: raw.hash.clone(),
        block_number,
    })
}

fn decode_token_record(raw: &RawTransaction, decimals: &str) -> Option<f64> {
    let decimals = decimals.trim().parse::<u32>().ok()?;
    let value = U256::from_str(raw.value.trim()).ok()?;
    scale(value, decimals)
}

fn decode_call_data(raw: &RawTransaction, token: &Token, chain: Chain) -> Option<f64> {
    let value = U256::from_str(raw.value.trim()).ok()?;
    if !value.is_zero() || raw.input.len() < MIN_TRANSFER_INPUT_LEN {
        return None;
    }

    let contract = token.contract(chain)?;
    if !contract.eq_ignore_ascii_case(&raw.to) {
        return None;
    }

    let word = raw.input.get(raw.input.len() - WORD_HEX_LEN..)?;
    let amount = U256::from_str_radix(word, 16).ok()?;
    scale(amount, token.decimals)
}

/// `raw / 10^decimals` computed on the decimal digits, so 256-bit values
/// never overflow before the final float conversion
pub fn scale(raw: U256, decimals: u32) -> Option<f64> {
    let digits = raw.to_string();
    let decimals = decimals as usize;

    let text = if decimals == 0 {
        digits
    } else if digits.len() > decimals {
        let (whole, frac) = digits.split_at(digits.len() - decimals);
        format!("{}.{}", whole, frac)
    } else {
        format!("0.{:0>width$}", digits, width = decimals)
    };

    text.parse::<f64>().ok()
}
