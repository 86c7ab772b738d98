//! Byte-level framing.
//!
//! A connection opens with the client's hostname, space-padded to
//! [`HOSTNAME_LEN`] bytes and sent raw. Every envelope after that travels as
//! one length-delimited frame.

use crate::net::error::HostnameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::LengthDelimitedCodec;

/// Size of the hostname preamble.
pub const HOSTNAME_LEN: usize = 64;

/// Largest envelope accepted on the wire (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Frame codec: 4-byte big-endian length prefix.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// A hostname must be non-empty, fit the preamble and contain no whitespace,
/// since the envelope header separates the target by a space.
pub fn validate_hostname(hostname: &str) -> Result<(), HostnameError> {
    if hostname.is_empty() {
        return Err(HostnameError::Empty);
    }
    if hostname.len() > HOSTNAME_LEN {
        return Err(HostnameError::TooLong(hostname.len()));
    }
    if hostname.chars().any(char::is_whitespace) {
        return Err(HostnameError::Whitespace);
    }
    Ok(())
}

pub fn pad_hostname(hostname: &str) -> Result<[u8; HOSTNAME_LEN], HostnameError> {
    validate_hostname(hostname)?;
    let mut padded = [b' '; HOSTNAME_LEN];
    padded[..hostname.len()].copy_from_slice(hostname.as_bytes());
    Ok(padded)
}

/// Strips the padding and validates what is left.
pub fn parse_hostname(raw: &[u8; HOSTNAME_LEN]) -> Result<String, HostnameError> {
    let text = std::str::from_utf8(raw).map_err(|_| HostnameError::NotUtf8)?;
    let hostname = text.trim();
    validate_hostname(hostname)?;
    Ok(hostname.to_string())
}

pub async fn write_hostname<W>(writer: &mut W, hostname: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let padded = pad_hostname(hostname)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&padded).await?;
    writer.flush().await
}

pub async fn read_hostname<R>(reader: &mut R) -> std::io::Result<[u8; HOSTNAME_LEN]>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HOSTNAME_LEN];
    reader.read_exact(&mut raw).await?;
    Ok(raw)
}
