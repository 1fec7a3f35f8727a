//! The byte sequence an uploader signs.
//!
//! Upload authorization covers the raw firmware files concatenated in
//! lexicographic name order, as `cat release/*` would produce. The archive
//! container is never signed.

use std::collections::BTreeMap;

/// Concatenate file contents in name order.
pub fn signable_bytes<K, V>(files: &BTreeMap<K, V>) -> Vec<u8>
where
    K: AsRef<str> + Ord,
    V: AsRef<[u8]>,
{
    let total = files.values().map(|v| v.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for content in files.values() {
        out.extend_from_slice(content.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenation_is_name_ordered() {
        let mut files = BTreeMap::new();
        files.insert("ota.py".to_string(), b"B".to_vec());
        files.insert("main.py".to_string(), b"A".to_vec());
        files.insert("config.py".to_string(), b"C".to_vec());
        assert_eq!(signable_bytes(&files), b"CAB");
    }
}
