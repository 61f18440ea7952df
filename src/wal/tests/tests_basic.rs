use super::super::*;
use tempfile::TempDir;

fn open_wal(tmp: &TempDir) -> Wal {
    Wal::open(WalOptions::new(tmp.path())).unwrap()
}

#[test]
fn write_then_read_round_trips() {
    let tmp = TempDir::new().unwrap();
    let wal = open_wal(&tmp);

    let loc = wal.write(b"hello wal").unwrap();
    assert_eq!(wal.read_at(loc).unwrap(), b"hello wal");
}

#[test]
fn multiple_writes_return_increasing_offsets_within_segment() {
    let tmp = TempDir::new().unwrap();
    let wal = open_wal(&tmp);

    let a = wal.write(b"first").unwrap();
    let b = wal.write(b"second").unwrap();

    assert_eq!(a.segment_id, b.segment_id);
    assert!(b.offset > a.offset);
    assert_eq!(wal.read_at(a).unwrap(), b"first");
    assert_eq!(wal.read_at(b).unwrap(), b"second");
}

#[test]
fn read_with_unknown_segment_id_fails() {
    let tmp = TempDir::new().unwrap();
    let wal = open_wal(&tmp);
    wal.write(b"only record").unwrap();

    let bogus = RecordLocation {
        segment_id: 999,
        offset: 0,
    };
    assert!(matches!(
        wal.read_at(bogus),
        Err(WalError::UnknownSegment { segment_id: 999 })
    ));
}

#[test]
fn write_exceeding_max_segment_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut options = WalOptions::new(tmp.path());
    options.max_segment_size = 1024;
    let wal = Wal::open(options).unwrap();

    let oversized = vec![0u8; 2048];
    assert!(matches!(
        wal.write(&oversized),
        Err(WalError::TooLargeData { .. })
    ));
}

#[test]
fn stats_reflect_write_counts() {
    let tmp = TempDir::new().unwrap();
    let wal = open_wal(&tmp);

    wal.write(b"abc").unwrap();
    wal.write(b"de").unwrap();

    let stats = wal.stats();
    assert_eq!(stats.total_write_ops, 2);
    assert_eq!(stats.total_bytes_written, 5);
    assert_eq!(stats.ops_since_last_sync, 2);
    assert_eq!(stats.bytes_since_last_sync, 5);
    assert_eq!(stats.sync_ops, 0);
}

#[test]
fn last_error_is_none_for_a_healthy_wal() {
    let tmp = TempDir::new().unwrap();
    let wal = open_wal(&tmp);
    assert_eq!(wal.last_error(), None);
}
