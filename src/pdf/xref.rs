//! Cross-reference bookkeeping

use std::collections::HashMap;

/// Cross-reference maps for one document.
///
/// Classic entries locate an object by byte offset; compressed entries locate
/// it inside an object stream. Sections are read newest-first, and insertions
/// are first-wins so `/Prev`-chained older sections never shadow newer ones.
#[derive(Debug, Default)]
pub struct XRefTable {
    classic: HashMap<i64, HashMap<i64, u64>>,
    compressed: HashMap<i64, (i64, usize)>,
}

impl XRefTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` is known to either map
    pub fn contains(&self, id: i64) -> bool {
        self.classic.contains_key(&id) || self.compressed.contains_key(&id)
    }

    /// Record a classic entry unless the id is already known
    pub fn insert_classic(&mut self, id: i64, gen: i64, offset: u64) {
        if !self.contains(id) {
            self.classic.insert(id, HashMap::from([(gen, offset)]));
        }
    }

    /// Record a compressed entry unless the id is already known
    pub fn insert_compressed(&mut self, id: i64, container: i64, index: usize) {
        if !self.contains(id) {
            self.compressed.insert(id, (container, index));
        }
    }

    /// Byte offset of a classic object, by id and generation
    pub fn offset_of(&self, id: i64, gen: i64) -> Option<u64> {
        self.classic.get(&id).and_then(|gens| gens.get(&gen)).copied()
    }

    /// True if `id` has a classic entry (any generation)
    pub fn has_classic(&self, id: i64) -> bool {
        self.classic.contains_key(&id)
    }

    /// Container object id and in-stream index for a compressed object
    pub fn compressed_entry(&self, id: i64) -> Option<(i64, usize)> {
        self.compressed.get(&id).copied()
    }

    /// Number of known object ids
    pub fn len(&self) -> usize {
        self.classic.len() + self.compressed.len()
    }

    /// True if no entries have been recorded
    pub fn is_empty(&self) -> bool {
        self.classic.is_empty() && self.compressed.is_empty()
    }
}

/// Decode a big-endian unsigned field of up to 8 bytes
pub fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_decode() {
        assert_eq!(read_be(&[]), 0);
        assert_eq!(read_be(&[0x05, 0x07]), 1287);
        assert_eq!(read_be(&[0x01, 0x00, 0x00]), 65536);
    }

    #[test]
    fn test_first_wins_layering() {
        let mut xref = XRefTable::new();

        // Newest section first.
        xref.insert_classic(4, 0, 100);
        xref.insert_compressed(5, 9, 2);

        // Older /Prev section must not shadow either entry.
        xref.insert_classic(4, 0, 900);
        xref.insert_classic(5, 0, 901);
        xref.insert_classic(6, 0, 902);

        assert_eq!(xref.offset_of(4, 0), Some(100));
        assert_eq!(xref.compressed_entry(5), Some((9, 2)));
        assert!(!xref.has_classic(5));
        assert_eq!(xref.offset_of(6, 0), Some(902));
        assert_eq!(xref.len(), 3);
    }

    #[test]
    fn test_generation_lookup() {
        let mut xref = XRefTable::new();
        xref.insert_classic(2, 1, 40);
        assert_eq!(xref.offset_of(2, 1), Some(40));
        assert_eq!(xref.offset_of(2, 0), None);
        assert!(xref.contains(2));
        assert!(!xref.contains(3));
    }
}
