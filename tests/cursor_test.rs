use kvstore::{CursorCodec, ScanCursor};

#[test]
fn cursors_survive_a_round_trip() {
    for bits in 0..=16 {
        let codec = CursorCodec::new(bits);
        let shards = 1usize << bits;
        for &shard in &[0, shards / 2, shards - 1] {
            for &inner in &[0, 1, 12_345, codec.max_inner()] {
                let cursor = ScanCursor { shard, inner };
                assert_eq!(codec.decode(codec.encode(cursor)), cursor, "{} bits", bits);
            }
        }
    }
}

#[test]
fn shard_index_sits_in_the_low_bits() {
    let codec = CursorCodec::new(4);
    assert_eq!(codec.bits(), 4);
    assert_eq!(codec.encode(ScanCursor { shard: 5, inner: 3 }), (3 << 4) | 5);
    assert_eq!(codec.decode(0x123), ScanCursor { shard: 3, inner: 0x12 });
    assert_eq!(codec.encode(ScanCursor::default()), 0);
}

#[test]
fn one_shard_cursor_is_the_shard_cursor() {
    let codec = CursorCodec::new(0);
    assert_eq!(codec.encode(ScanCursor { shard: 0, inner: 42 }), 42);
    assert_eq!(codec.max_inner(), u64::MAX);
}

#[test]
#[should_panic]
fn too_many_shard_bits() {
    CursorCodec::new(17);
}
