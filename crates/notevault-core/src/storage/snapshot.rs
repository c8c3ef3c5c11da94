//! In-memory committed state and its serialized form.
//!
//! A snapshot is an ordered map from byte keys to byte values. The payload
//! stored inside the container is:
//!
//! ```text
//! entry_count u32 LE
//! repeated: key_len u32 LE | key | value_len u32 LE | value
//! ```

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Ordered key/value state of the vault.
pub type Snapshot = BTreeMap<Vec<u8>, Vec<u8>>;

/// Uncommitted writes: `Some` is an upsert, `None` a delete.
pub(crate) type Pending = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Serialize a snapshot into a container payload.
pub fn encode(snapshot: &Snapshot) -> Result<Zeroizing<Vec<u8>>> {
    let size: usize = 4 + snapshot
        .iter()
        .map(|(key, value)| 8 + key.len() + value.len())
        .sum::<usize>();
    let mut out = Zeroizing::new(Vec::with_capacity(size));

    out.extend_from_slice(&len_u32(snapshot.len())?.to_le_bytes());
    for (key, value) in snapshot {
        out.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&len_u32(value.len())?.to_le_bytes());
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// Parse a container payload.
///
/// The payload has already been authenticated, so a malformed layout means
/// an incompatible writer rather than tampering.
pub fn decode(payload: &[u8]) -> Result<Snapshot> {
    let mut reader = Reader { buf: payload, pos: 0 };
    let count = reader.u32()?;
    let mut snapshot = Snapshot::new();

    for _ in 0..count {
        let key_len = reader.u32()? as usize;
        let key = reader.take(key_len)?.to_vec();
        let value_len = reader.u32()? as usize;
        let value = reader.take(value_len)?.to_vec();
        if snapshot.insert(key, value).is_some() {
            return Err(malformed("duplicate key"));
        }
    }

    if reader.pos != payload.len() {
        return Err(malformed("trailing bytes"));
    }
    Ok(snapshot)
}

/// Overlay pending writes onto a copy of `base`.
pub(crate) fn merge(base: &Snapshot, pending: &Pending) -> Snapshot {
    let mut merged = base.clone();
    apply(&mut merged, pending);
    merged
}

/// Apply pending writes in place.
pub(crate) fn apply(target: &mut Snapshot, pending: &Pending) {
    for (key, value) in pending {
        match value {
            Some(value) => {
                target.insert(key.clone(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| VaultError::Storage("Entry too large to store".to_string()))
}

fn malformed(detail: &str) -> VaultError {
    VaultError::Storage(format!("Malformed snapshot payload: {}", detail))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed("truncated entry"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
