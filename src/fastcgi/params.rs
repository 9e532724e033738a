//! Name-value pair codec for Params and GetValues streams.
//!
//! Lengths up to 127 take one byte; longer lengths take four bytes
//! big-endian with the top bit set.

use std::collections::BTreeMap;

use crate::fastcgi::error::FcgiError;
use crate::fastcgi::record::MAX_WRITE;

/// Parameter set sent to the responder. Order carries no meaning.
pub type Params = BTreeMap<String, String>;

/// Worst-case bytes taken by the two length prefixes of one pair.
const PAIR_OVERHEAD: usize = 8;

/// Append the encoded form of `size` to `out`, returning the bytes written.
pub fn encode_size(out: &mut Vec<u8>, size: u32) -> usize {
    if size > 127 {
        out.extend_from_slice(&(size | 1 << 31).to_be_bytes());
        4
    } else {
        out.push(size as u8);
        1
    }
}

/// Decode a length prefix, returning the value and the bytes consumed.
pub fn decode_size(s: &[u8]) -> Option<(u32, usize)> {
    let first = *s.first()?;
    if first & 0x80 == 0 {
        return Some((first as u32, 1));
    }
    let raw: [u8; 4] = s.get(..4)?.try_into().ok()?;
    Some((u32::from_be_bytes(raw) & !(1 << 31), 4))
}

/// Append one encoded pair to `out`.
pub fn encode_pair(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    encode_size(out, key.len() as u32);
    encode_size(out, value.len() as u32);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
}

/// Decode every pair packed into `buf`.
pub fn decode_pairs(mut buf: &[u8]) -> Result<Vec<(String, String)>, FcgiError> {
    let mut pairs = Vec::new();
    while !buf.is_empty() {
        let (key_len, n) = decode_size(buf).ok_or(FcgiError::TruncatedPair)?;
        buf = &buf[n..];
        let (value_len, n) = decode_size(buf).ok_or(FcgiError::TruncatedPair)?;
        buf = &buf[n..];

        let key_len = key_len as usize;
        let value_len = value_len as usize;
        if buf.len() < key_len + value_len {
            return Err(FcgiError::TruncatedPair);
        }
        let key = String::from_utf8_lossy(&buf[..key_len]).into_owned();
        let value = String::from_utf8_lossy(&buf[key_len..key_len + value_len]).into_owned();
        buf = &buf[key_len + value_len..];
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Pack a parameter set into Params record contents.
///
/// No chunk exceeds [`MAX_WRITE`]; a pair that would push the current chunk
/// over the limit starts a new one. A pair too large for a record on its own
/// has its value (and, if needed, its key) truncated to fit.
pub fn pack_params(params: &Params) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();

    for (key, value) in params {
        let mut key = key.as_bytes();
        let mut value = value.as_bytes();
        if PAIR_OVERHEAD + key.len() + value.len() > MAX_WRITE {
            key = &key[..key.len().min(MAX_WRITE - PAIR_OVERHEAD)];
            value = &value[..MAX_WRITE - PAIR_OVERHEAD - key.len()];
            tracing::warn!(
                key = %String::from_utf8_lossy(key),
                kept = value.len(),
                "Parameter truncated to fit a single record"
            );
        }

        let mut pair = Vec::with_capacity(PAIR_OVERHEAD + key.len() + value.len());
        encode_pair(&mut pair, key, value);
        if current.len() + pair.len() > MAX_WRITE {
            chunks.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&pair);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lengths_use_one_byte() {
        for len in [0u32, 1, 64, 127] {
            let mut out = Vec::new();
            assert_eq!(encode_size(&mut out, len), 1);
            assert_eq!(decode_size(&out), Some((len, 1)));
        }
    }

    #[test]
    fn long_lengths_use_four_bytes() {
        for len in [128u32, 300, 65535, 1 << 24, (1u32 << 31) - 1] {
            let mut out = Vec::new();
            assert_eq!(encode_size(&mut out, len), 4);
            assert_eq!(out[0] & 0x80, 0x80);
            assert_eq!(decode_size(&out), Some((len, 4)));
        }
    }

    #[test]
    fn truncated_long_length_is_none() {
        assert_eq!(decode_size(&[0x80, 0x00]), None);
        assert_eq!(decode_size(&[]), None);
    }

    #[test]
    fn pairs_decode_back() {
        let mut params = Params::new();
        params.insert("SCRIPT_FILENAME".into(), "/srv/www/index.php".into());
        params.insert("QUERY_STRING".into(), "a".repeat(200));
        let chunks = pack_params(&params);
        assert_eq!(chunks.len(), 1);

        let decoded = decode_pairs(&chunks[0]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.contains(&("QUERY_STRING".to_string(), "a".repeat(200))));
    }

    #[test]
    fn large_sets_split_across_records() {
        let mut params = Params::new();
        for i in 0..5 {
            params.insert(format!("KEY_{i}"), "v".repeat(20_000));
        }
        let chunks = pack_params(&params);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_WRITE);
        }
        let total: usize = chunks.iter().map(|c| decode_pairs(c).unwrap().len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn oversized_value_is_truncated() {
        let mut params = Params::new();
        params.insert("HUGE".into(), "x".repeat(100_000));
        let chunks = pack_params(&params);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() <= MAX_WRITE);
        let decoded = decode_pairs(&chunks[0]).unwrap();
        assert_eq!(decoded[0].0, "HUGE");
        assert_eq!(decoded[0].1.len(), MAX_WRITE - PAIR_OVERHEAD - 4);
    }

    #[test]
    fn empty_set_packs_to_nothing() {
        assert!(pack_params(&Params::new()).is_empty());
    }
}
