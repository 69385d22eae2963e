//! Minimal OpenPGP packet framing.
//!
//! Only enough of RFC 4880 to walk packet boundaries and read the S2K salt of
//! a symmetric-key encrypted session key packet. Nothing here decrypts.

use crate::error::{CacheError, Result};

/// Symmetric-key encrypted session key packet.
pub const TAG_SYMKEY_ESK: u8 = 3;

/// S2K specifier types that carry an 8-byte salt.
const S2K_SALTED: u8 = 1;
const S2K_ITERATED_SALTED: u8 = 3;

pub const SALT_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub tag: u8,
    /// Offset of the packet header within the stream.
    pub offset: usize,
    /// Body bytes, with partial-length chunks already joined.
    pub body: Vec<u8>,
}

/// Walk every packet in `data`.
///
/// Fails when the stream is empty, a length runs past the end, or bytes are
/// left over after the last complete packet. Reassembled share sets that are
/// missing a share or carry a stale one fail here before any decryption.
pub fn walk(data: &[u8]) -> Result<Vec<Packet>> {
    if data.is_empty() {
        return Err(malformed("empty packet stream"));
    }

    let mut packets = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (packet, next) = read_packet(data, pos)?;
        packets.push(packet);
        pos = next;
    }
    Ok(packets)
}

/// Read the packet starting at `pos`, returning it and the offset after it.
pub fn read_packet(data: &[u8], pos: usize) -> Result<(Packet, usize)> {
    let ctb = *data.get(pos).ok_or_else(|| malformed("truncated packet header"))?;
    if ctb & 0x80 == 0 {
        return Err(malformed(&format!("invalid packet tag byte 0x{:02x} at {}", ctb, pos)));
    }

    let mut cursor = pos + 1;
    let mut body = Vec::new();

    let tag = if ctb & 0x40 != 0 {
        let tag = ctb & 0x3f;
        loop {
            let (len, partial) = read_new_length(data, &mut cursor)?;
            take(data, &mut cursor, len, &mut body)?;
            if !partial {
                break;
            }
        }
        tag
    } else {
        let tag = (ctb >> 2) & 0x0f;
        let len = match ctb & 0x03 {
            0 => read_be(data, &mut cursor, 1)?,
            1 => read_be(data, &mut cursor, 2)?,
            2 => read_be(data, &mut cursor, 4)?,
            // indeterminate length runs to the end of the stream
            _ => data.len() - cursor,
        };
        take(data, &mut cursor, len, &mut body)?;
        tag
    };

    if tag == 0 {
        return Err(malformed("reserved packet tag 0"));
    }

    Ok((
        Packet {
            tag,
            offset: pos,
            body,
        },
        cursor,
    ))
}

/// Extract the S2K salt from the leading symmetric-key ESK packet.
pub fn symkey_salt(data: &[u8]) -> Result<[u8; SALT_LEN]> {
    let (packet, _) = read_packet(data, 0)?;
    if packet.tag != TAG_SYMKEY_ESK {
        return Err(malformed(&format!(
            "first packet has tag {}, expected a symmetric-key session packet",
            packet.tag
        )));
    }

    let body = &packet.body;
    let s2k_start = match body.first() {
        // version, cipher algo
        Some(4) => 2,
        // version, cipher algo, aead algo
        Some(5) => 3,
        Some(v) => return Err(malformed(&format!("unsupported session packet version {}", v))),
        None => return Err(malformed("empty session packet")),
    };

    let s2k = body
        .get(s2k_start..)
        .ok_or_else(|| malformed("session packet too short"))?;
    match s2k.first() {
        Some(&S2K_SALTED) | Some(&S2K_ITERATED_SALTED) => {}
        Some(t) => return Err(malformed(&format!("S2K type {} carries no salt", t))),
        None => return Err(malformed("missing S2K specifier")),
    }

    // type, hash algo, salt
    let salt = s2k
        .get(2..2 + SALT_LEN)
        .ok_or_else(|| malformed("S2K salt truncated"))?;
    let mut out = [0u8; SALT_LEN];
    out.copy_from_slice(salt);
    Ok(out)
}

/// Encode a new-format packet header for a body of `len` bytes.
pub fn new_format_header(tag: u8, len: usize) -> Vec<u8> {
    let mut header = vec![0xC0 | (tag & 0x3f)];
    if len < 192 {
        header.push(len as u8);
    } else if len < 8384 {
        let adjusted = len - 192;
        header.push(((adjusted >> 8) as u8) + 192);
        header.push((adjusted & 0xff) as u8);
    } else {
        header.push(0xff);
        header.extend_from_slice(&(len as u32).to_be_bytes());
    }
    header
}

fn read_new_length(data: &[u8], cursor: &mut usize) -> Result<(usize, bool)> {
    let first = read_be(data, cursor, 1)?;
    match first {
        0..=191 => Ok((first, false)),
        192..=223 => {
            let second = read_be(data, cursor, 1)?;
            Ok((((first - 192) << 8) + second + 192, false))
        }
        224..=254 => Ok((1usize << (first & 0x1f), true)),
        _ => Ok((read_be(data, cursor, 4)?, false)),
    }
}

fn read_be(data: &[u8], cursor: &mut usize, width: usize) -> Result<usize> {
    let bytes = data
        .get(*cursor..*cursor + width)
        .ok_or_else(|| malformed("truncated packet length"))?;
    *cursor += width;
    Ok(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

fn take(data: &[u8], cursor: &mut usize, len: usize, body: &mut Vec<u8>) -> Result<()> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed("truncated packet body"))?;
    body.extend_from_slice(&data[*cursor..end]);
    *cursor = end;
    Ok(())
}

fn malformed(msg: &str) -> CacheError {
    CacheError::MalformedEnvelope(msg.to_string())
}
