use super::*;
use tempfile::tempdir;

fn entries(pairs: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

#[test]
fn build_then_get_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let info = SstWriter::new(&path, Some(0.01))
        .build(entries(&[("b", "2"), ("a", "1"), ("c", "3")]))
        .unwrap();
    assert_eq!(info.smallest_key, b"a");
    assert_eq!(info.largest_key, b"c");
    assert_eq!(info.entry_count, 3);

    let reader = SstReader::open(&path).unwrap();
    assert_eq!(reader.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(reader.get(b"c").unwrap(), Some(b"3".to_vec()));
    assert_eq!(reader.get(b"missing").unwrap(), None);
}

#[test]
fn duplicate_keys_last_write_wins() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("a", "old"), ("a", "new")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    assert_eq!(reader.get(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(reader.len(), 1);
}

#[test]
fn tombstone_is_present_with_empty_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("a", "")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    assert_eq!(reader.get(b"a").unwrap(), Some(Vec::new()));
}

#[test]
fn range_is_ascending_and_bounded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("d", "4"), ("b", "2"), ("a", "1"), ("c", "3")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    let got: Vec<Vec<u8>> = reader
        .range(Some(b"b"), Some(b"c"))
        .map(|(k, _)| k)
        .collect();
    assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn range_unbounded_returns_everything_ascending() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("z", "1"), ("a", "2")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    let got: Vec<Vec<u8>> = reader.range(None, None).map(|(k, _)| k).collect();
    assert_eq!(got, vec![b"a".to_vec(), b"z".to_vec()]);
}

#[test]
fn bloom_filter_rejects_absent_keys_without_reading_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, Some(0.01))
        .build(entries(&[("a", "1")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    assert!(reader.get(b"a").unwrap().is_some());
    // Not a hard guarantee (false positives are allowed), but this probe
    // exercises the early-return path without asserting on it directly.
    let _ = reader.get(b"definitely-not-present-zzz").unwrap();
}

#[test]
fn no_bloom_filter_still_serves_correct_reads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("a", "1"), ("b", "2")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    assert_eq!(reader.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.get(b"missing").unwrap(), None);
}

#[test]
fn footer_magic_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("a", "1")]))
        .unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let len = bytes.len();
    bytes[len - 1] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = SstReader::open(&path).unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)));
}

#[test]
fn file_too_short_for_footer_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    std::fs::write(&path, b"short").unwrap();
    let err = SstReader::open(&path).unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)));
}

#[test]
fn building_empty_entries_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let err = SstWriter::new(&path, None).build(Vec::new()).unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)));
}

#[test]
fn smallest_and_largest_key_accessors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    SstWriter::new(&path, None)
        .build(entries(&[("m", "1"), ("a", "2"), ("z", "3")]))
        .unwrap();
    let reader = SstReader::open(&path).unwrap();
    assert_eq!(reader.smallest_key(), Some(b"a".as_slice()));
    assert_eq!(reader.largest_key(), Some(b"z".as_slice()));
    assert_eq!(reader.file_size() as usize, test_mmap_len(&reader));
}
