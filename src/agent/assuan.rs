//! Assuan line encoding as spoken by gpg-agent (and reused by the socket agent).

/// GPG_ERR_NO_DATA: what GETVAL answers for a name that was never set.
pub const GPG_ERR_NO_DATA: u32 = 58;

/// One parsed response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Ok,
    Data(Vec<u8>),
    Err { code: u32, message: String },
    /// Status (`S`), comment (`#`) or anything else we don't act on.
    Other(String),
}

/// Outcome of one command: its data lines, or the error that ended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Vec<u8>),
    Err { code: u32, message: String },
}

impl Reply {
    /// Whether this is the agent's "no data" error.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Reply::Err { code, .. } if code & 0xffff == GPG_ERR_NO_DATA)
    }
}

/// Percent-escape a value for a command argument.
///
/// gpg-agent unescapes PUTVAL values with `+` meaning space, so everything
/// outside a conservative set is escaped, `+` and space included.
pub fn escape(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'=') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Undo `%XX` escapes in a data line.
pub fn unescape(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

pub fn parse_line(line: &str) -> Line {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == "OK" || line.starts_with("OK ") {
        Line::Ok
    } else if let Some(data) = line.strip_prefix("D ") {
        Line::Data(unescape(data))
    } else if let Some(rest) = line.strip_prefix("ERR ") {
        let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
        Line::Err {
            code: code.parse().unwrap_or(0),
            message: message.to_string(),
        }
    } else {
        Line::Other(line.to_string())
    }
}

/// Split a transcript of several commands into one [`Reply`] per command.
///
/// Each command ends with an `OK` or an `ERR` line; data lines before it
/// belong to that command.
pub fn parse_replies(transcript: &str) -> Vec<Reply> {
    let mut replies = Vec::new();
    let mut data = Vec::new();
    for line in transcript.lines() {
        match parse_line(line) {
            Line::Ok => replies.push(Reply::Ok(std::mem::take(&mut data))),
            Line::Data(chunk) => data.extend_from_slice(&chunk),
            Line::Err { code, message } => {
                data.clear();
                replies.push(Reply::Err { code, message });
            }
            Line::Other(_) => {}
        }
    }
    replies
}
