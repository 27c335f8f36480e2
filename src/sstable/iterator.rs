//! Ascending, bounded iterator over one SSTable's records.

use super::SstReader;

/// Yields `(key, value)` pairs (tombstones included as empty values) for
/// `lo <= key <= hi` in ascending order, reading through the reader's
/// index with a binary search to locate the starting position.
pub struct RangeIter<'a> {
    reader: &'a SstReader,
    hi: Option<Vec<u8>>,
    next_idx: usize,
}

impl<'a> RangeIter<'a> {
    pub(super) fn new(reader: &'a SstReader, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Self {
        let next_idx = match lo {
            Some(lo) => match reader.index.binary_search_by(|(k, _)| k.as_slice().cmp(lo)) {
                Ok(i) => i,
                Err(i) => i,
            },
            None => 0,
        };
        Self {
            reader,
            hi: hi.map(|h| h.to_vec()),
            next_idx,
        }
    }
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, offset) = self.reader.index.get(self.next_idx)?;
        if let Some(hi) = &self.hi
            && key.as_slice() > hi.as_slice()
        {
            return None;
        }
        let key = key.clone();
        let value = self.reader.read_record_at(*offset, &key).ok()?;
        self.next_idx += 1;
        Some((key, value))
    }
}
