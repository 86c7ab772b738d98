//! Payload formats of the handshake envelopes.
//!
//! | method      | payload                                   |
//! |-------------|-------------------------------------------|
//! | `BASIS`     | one `0`/`1` per qubit, `1` = diagonal     |
//! | `RES BASIS` | comma-separated coincidence indices       |
//! | `CHECK`     | indices line, then bits line, both `,`-separated |
//! | `RES CHECK` | `True` or `False`                         |

use crate::net::error::PayloadError;
use crate::protocols::bb84::{Basis, CheckSample};

pub fn format_basis(basis: &[Basis]) -> String {
    basis
        .iter()
        .map(|b| if b.is_diagonal() { '1' } else { '0' })
        .collect()
}

pub fn parse_basis(payload: &str) -> Result<Vec<Basis>, PayloadError> {
    payload
        .trim()
        .chars()
        .map(|c| match c {
            '0' => Ok(Basis::Rectilinear),
            '1' => Ok(Basis::Diagonal),
            other => Err(PayloadError::InvalidBasis(other)),
        })
        .collect()
}

pub fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// An empty payload is an empty index list.
pub fn parse_indices(payload: &str) -> Result<Vec<usize>, PayloadError> {
    split_list(payload)
        .map(|item| {
            item.parse()
                .map_err(|_| PayloadError::InvalidIndex(item.to_string()))
        })
        .collect()
}

pub fn format_check(sample: &CheckSample) -> String {
    let bits = sample
        .bits
        .iter()
        .map(|&b| if b { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join(",");
    format!("{}\n{}", format_indices(&sample.indices), bits)
}

/// Lengths are not compared here; the session rejects a mismatched sample.
pub fn parse_check(payload: &str) -> Result<CheckSample, PayloadError> {
    let mut lines = payload.lines();
    let (Some(indices), Some(bits), None) = (lines.next(), lines.next(), lines.next()) else {
        return Err(PayloadError::MalformedCheck);
    };

    let bits = split_list(bits)
        .map(|item| match item {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(PayloadError::InvalidBit(other.to_string())),
        })
        .collect::<Result<_, _>>()?;

    Ok(CheckSample {
        indices: parse_indices(indices)?,
        bits,
    })
}

pub fn format_verdict(passed: bool) -> &'static str {
    if passed { "True" } else { "False" }
}

pub fn parse_verdict(payload: &str) -> Result<bool, PayloadError> {
    match payload.trim() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(PayloadError::InvalidVerdict(other.to_string())),
    }
}

fn split_list(line: &str) -> impl Iterator<Item = &str> {
    let line = line.trim();
    line.split(',')
        .map(str::trim)
        .filter(move |_| !line.is_empty())
}
