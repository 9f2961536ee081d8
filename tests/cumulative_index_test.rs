use rand::prelude::*;

use kvstore::store::cumulative::CumulativeIndex;

#[test]
fn prefix_sums_follow_updates() {
    let mut rng = thread_rng();
    let mut index = CumulativeIndex::new(4).unwrap();
    let mut counts = vec![0u64; 16];
    assert_eq!(index.num_shards(), 16);
    for _ in 0..2_000 {
        let shard = rng.gen_range(0..16);
        let delta: i64 = if counts[shard] > 0 && rng.gen_bool(0.4) {
            -(rng.gen_range(1..=counts[shard]) as i64)
        } else {
            rng.gen_range(1..10)
        };
        index.update(shard, delta);
        counts[shard] = (counts[shard] as i64 + delta) as u64;

        assert_eq!(index.total(), counts.iter().sum::<u64>());
        let probe = rng.gen_range(0..16);
        assert_eq!(index.prefix_query(probe), counts[..=probe].iter().sum::<u64>());
    }
}

#[test]
fn find_inverts_prefix_query() {
    let mut index = CumulativeIndex::new(3).unwrap();
    let counts = [3u64, 0, 5, 1, 0, 0, 7, 2];
    for (shard, &count) in counts.iter().enumerate() {
        if count > 0 {
            index.update(shard, count as i64);
        }
    }
    for shard in 0..8 {
        let low = if shard == 0 { 0 } else { index.prefix_query(shard - 1) };
        for target in low + 1..=index.prefix_query(shard) {
            assert_eq!(index.find_shard_by_key_index(target), shard, "key index {}", target);
        }
    }
    // only non-empty shards are ever found.
    assert_eq!(index.find_shard_by_key_index(4), 2);
    assert_eq!(index.find_shard_by_key_index(10), 6);
}

#[test]
fn single_bit_index() {
    let mut index = CumulativeIndex::new(1).unwrap();
    index.update(1, 5);
    assert_eq!(index.prefix_query(0), 0);
    assert_eq!(index.total(), 5);
    assert_eq!(index.find_shard_by_key_index(1), 1);
    assert_eq!(index.find_shard_by_key_index(5), 1);
}

#[test]
fn clear_forgets_everything() {
    let mut index = CumulativeIndex::new(2).unwrap();
    index.update(0, 3);
    index.update(3, 4);
    index.clear();
    assert_eq!(index.total(), 0);
    assert_eq!(index.prefix_query(2), 0);
}

#[test]
#[should_panic(expected = "below zero")]
fn counts_cannot_go_negative() {
    let mut index = CumulativeIndex::new(2).unwrap();
    index.update(1, 2);
    index.update(1, -3);
}

#[test]
#[should_panic]
fn key_index_beyond_total() {
    let mut index = CumulativeIndex::new(2).unwrap();
    index.update(2, 2);
    index.find_shard_by_key_index(3);
}

#[test]
#[should_panic]
fn shard_out_of_range() {
    let mut index = CumulativeIndex::new(2).unwrap();
    index.update(4, 1);
}
