//! pax extended header records (`"<len> <key>=<value>\n"`).

use crate::{Error, Result};

/// One parsed record. Values are raw bytes; paths need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PaxRecord {
    pub(crate) key: String,
    pub(crate) value: Vec<u8>,
}

/// Parses a pax extended header body.
///
/// `offset` is only used for error reporting.
pub(crate) fn parse_records(data: &[u8], offset: u64) -> Result<Vec<PaxRecord>> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        // Trailing NUL padding after the last record
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::invalid_entry(offset, "pax record without length"))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::invalid_entry(offset, "malformed pax record length"))?;
        if len <= space + 1 || len > rest.len() || rest[len - 1] != b'\n' {
            return Err(Error::invalid_entry(offset, "pax record length out of range"));
        }
        let body = &rest[space + 1..len - 1];
        let eq = body
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| Error::invalid_entry(offset, "pax record without '='"))?;
        let key = String::from_utf8_lossy(&body[..eq]).into_owned();
        records.push(PaxRecord {
            key,
            value: body[eq + 1..].to_vec(),
        });
        rest = &rest[len..];
    }
    Ok(records)
}

/// Appends one record; the length prefix counts itself.
pub(crate) fn push_record(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    // " " + key + "=" + value + "\n"
    let body = 1 + key.len() + 1 + value.len() + 1;
    let mut len = body + 1;
    loop {
        let total = body + len.to_string().len();
        if total == len {
            break;
        }
        len = total;
    }
    out.extend_from_slice(len.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
}
