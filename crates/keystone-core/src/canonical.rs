//! Canonical CBOR encoding for deterministic transaction identity.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! Every validating node must derive the same transaction id and signing
//! digest from the same transaction, so this encoding never depends on
//! serde field order or library defaults.

use ciborium::value::Value;

use crate::transaction::{Action, Transaction};

/// Transaction field keys (integer keys for compact encoding).
mod keys {
    pub const EXPIRATION: u64 = 0;
    pub const DELAY_SEC: u64 = 1;
    pub const ACTIONS: u64 = 2;

    pub const ACTION_ACCOUNT: u64 = 0;
    pub const ACTION_NAME: u64 = 1;
    pub const ACTION_AUTHORIZATION: u64 = 2;
    pub const ACTION_DATA: u64 = 3;
}

/// Encode a transaction (without signatures) to canonical CBOR bytes.
pub fn canonical_transaction_bytes(trx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &transaction_to_cbor_value(trx));
    buf
}

fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

fn transaction_to_cbor_value(trx: &Transaction) -> Value {
    let actions = trx.actions.iter().map(action_to_cbor_value).collect();
    Value::Map(vec![
        (uint(keys::EXPIRATION), Value::Integer(trx.expiration.as_micros().into())),
        (uint(keys::DELAY_SEC), uint(u64::from(trx.delay_sec))),
        (uint(keys::ACTIONS), Value::Array(actions)),
    ])
}

fn action_to_cbor_value(action: &Action) -> Value {
    let authorization = action
        .authorization
        .iter()
        .map(|level| {
            Value::Array(vec![
                uint(level.actor.as_u64()),
                uint(level.permission.as_u64()),
            ])
        })
        .collect();
    Value::Map(vec![
        (uint(keys::ACTION_ACCOUNT), uint(action.account.as_u64())),
        (uint(keys::ACTION_NAME), uint(action.name.as_u64())),
        (uint(keys::ACTION_AUTHORIZATION), Value::Array(authorization)),
        (uint(keys::ACTION_DATA), Value::Bytes(action.data.clone())),
    ])
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        // undefined
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
