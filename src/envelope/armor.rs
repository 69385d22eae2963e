//! ASCII armor for OpenPGP messages.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::Envelope;
use crate::error::{CacheError, Result};

pub const BEGIN_MESSAGE: &str = "-----BEGIN PGP MESSAGE-----";
pub const END_MESSAGE: &str = "-----END PGP MESSAGE-----";

/// Base64 characters per armored body line.
const LINE_WIDTH: usize = 64;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

/// OpenPGP CRC-24 over `data`.
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// Wrap raw packet bytes in a `PGP MESSAGE` armor block with a checksum line.
pub fn armor(data: &[u8]) -> Envelope {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 80);
    out.push_str(BEGIN_MESSAGE);
    out.push_str("\n\n");

    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        // base64 is ASCII, so any byte index is a char boundary
        let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
        out.push_str(line);
        out.push('\n');
        rest = tail;
    }

    let crc = crc24(data).to_be_bytes();
    out.push('=');
    out.push_str(&BASE64.encode(&crc[1..]));
    out.push('\n');
    out.push_str(END_MESSAGE);
    out.push('\n');

    Envelope::new(out)
}

/// Strip the armor from an envelope and return the raw packet bytes.
///
/// Armor headers are skipped. When a checksum line is present it must match.
pub fn unarmor(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut lines = envelope
        .as_str()
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .skip_while(|l| l.trim() != BEGIN_MESSAGE);

    if lines.next().is_none() {
        return Err(malformed("missing BEGIN PGP MESSAGE line"));
    }

    let mut body = String::new();
    let mut checksum: Option<&str> = None;
    let mut in_headers = true;
    let mut terminated = false;

    for line in lines {
        let line = line.trim();
        if line == END_MESSAGE {
            terminated = true;
            break;
        }
        if in_headers {
            if line.is_empty() {
                in_headers = false;
                continue;
            }
            if line.contains(": ") {
                continue;
            }
            in_headers = false;
        }
        if line.starts_with('=') && line.len() == 5 {
            checksum = Some(&line[1..]);
            continue;
        }
        body.push_str(line);
    }

    if !terminated {
        return Err(malformed("missing END PGP MESSAGE line"));
    }

    let data = BASE64
        .decode(body.as_bytes())
        .map_err(|e| malformed(&format!("invalid base64 body: {}", e)))?;

    if let Some(checksum) = checksum {
        let expected = BASE64
            .decode(checksum)
            .map_err(|e| malformed(&format!("invalid checksum line: {}", e)))?;
        let actual = crc24(&data).to_be_bytes();
        if expected.as_slice() != &actual[1..] {
            return Err(malformed("armor checksum mismatch"));
        }
    }

    Ok(data)
}

fn malformed(msg: &str) -> CacheError {
    CacheError::MalformedEnvelope(msg.to_string())
}
