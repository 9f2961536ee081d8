use kvstore::dict::ResizePolicy;
use kvstore::store::rehash::RehashList;
use kvstore::{KvStore, KvStoreFlags};

fn fill(kvs: &mut KvStore<String, u32>, shard: usize, n: u32) {
    for i in 0..n {
        kvs.shard_add_raw(shard, format!("{}:{}", shard, i), i).expect("fresh key");
    }
}

fn settle(kvs: &mut KvStore<String, u32>) {
    while kvs.rehashing_count() > 0 {
        kvs.incrementally_rehash(1_000);
    }
}

fn shard_buckets(kvs: &KvStore<String, u32>) -> u64 {
    (0..kvs.num_shards())
        .filter_map(|shard| kvs.shard(shard))
        .map(|d| d.buckets() as u64)
        .sum()
}

#[test]
fn rehashes_pending_shards_to_completion() {
    let mut kvs: KvStore<String, u32> = KvStore::new(2, KvStoreFlags::empty()).unwrap();
    fill(&mut kvs, 0, 3);
    fill(&mut kvs, 1, 3);
    assert_eq!(kvs.bucket_count(), 8);
    assert_eq!(kvs.rehashing_count(), 0);
    assert_eq!(kvs.incrementally_rehash(1_000), 0);

    assert!(kvs.shard_expand(0, 1024));
    assert_eq!(kvs.rehashing_count(), 1);
    assert_eq!(kvs.rehashing_shards(), vec![0]);
    assert_eq!(kvs.bucket_count(), 8 + 1024);
    assert!(kvs.shard_expand(1, 1024));
    assert_eq!(kvs.rehashing_shards(), vec![0, 1]);
    assert!(kvs.overhead_hashtable_rehashing() > 0);

    while kvs.incrementally_rehash(1_000_000) != 0 {}
    assert_eq!(kvs.rehashing_count(), 0);
    assert_eq!(kvs.overhead_hashtable_rehashing(), 0);
    assert_eq!(kvs.bucket_count(), 2048);
    assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));
    for shard in 0..2 {
        let d = kvs.shard(shard).unwrap();
        assert!(!d.is_rehashing());
        assert_eq!(d.table_size(0), 1024);
    }
}

#[test]
fn bucket_count_matches_the_shards() {
    let flags = KvStoreFlags::ALLOCATE_SHARDS_ON_DEMAND | KvStoreFlags::FREE_EMPTY_SHARDS;
    let mut kvs: KvStore<String, u32> = KvStore::new(3, flags).unwrap();
    for shard in 0..8 {
        fill(&mut kvs, shard, 50 * (shard as u32 + 1));
        assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));
    }
    settle(&mut kvs);
    assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));

    for i in 0..200 {
        kvs.shard_delete(3, format!("3:{}", i).as_str());
        kvs.shard_delete(7, format!("7:{}", i).as_str());
        assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));
    }
    for i in 0..50 {
        kvs.shard_delete(0, format!("0:{}", i).as_str());
    }
    assert!(kvs.shard(0).is_none());
    settle(&mut kvs);
    assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));
}

#[test]
fn a_released_shard_leaves_the_rehashing_list() {
    let flags = KvStoreFlags::FREE_EMPTY_SHARDS;
    let mut kvs: KvStore<String, u32> = KvStore::new(1, flags).unwrap();
    fill(&mut kvs, 1, 3);
    assert!(kvs.shard_expand(1, 64));
    assert_eq!(kvs.rehashing_shards(), vec![1]);
    for i in 0..3 {
        kvs.shard_delete(1, format!("1:{}", i).as_str());
    }
    assert!(kvs.shard(1).is_none());
    assert_eq!(kvs.rehashing_count(), 0);
    assert_eq!(kvs.bucket_count(), 0);
    assert_eq!(kvs.incrementally_rehash(1_000), 0);
}

#[test]
fn resize_shards_shrinks_over_filled_tables() {
    let mut kvs: KvStore<String, u32> = KvStore::new(2, KvStoreFlags::empty()).unwrap();
    fill(&mut kvs, 0, 200);
    settle(&mut kvs);
    assert_eq!(kvs.shard(0).unwrap().table_size(0), 256);

    let dict_type = kvs.shard(0).unwrap().dict_type().clone();
    dict_type.set_resize_policy(ResizePolicy::Forbid);
    for i in 0..195 {
        kvs.shard_delete(0, format!("0:{}", i).as_str());
    }
    assert_eq!(kvs.shard(0).unwrap().table_size(0), 256);
    assert_eq!(kvs.rehashing_count(), 0);

    dict_type.set_resize_policy(ResizePolicy::Enable);
    kvs.try_resize_shards(1);
    assert_eq!(kvs.rehashing_shards(), vec![0]);
    settle(&mut kvs);
    assert_eq!(kvs.shard(0).unwrap().table_size(0), 8);
    assert_eq!(kvs.bucket_count(), shard_buckets(&kvs));
}

#[test]
fn resize_shards_resumes_where_it_stopped() {
    let mut kvs: KvStore<String, u32> = KvStore::new(2, KvStoreFlags::empty()).unwrap();
    let dict_type = kvs.shard(0).unwrap().dict_type().clone();
    dict_type.set_resize_policy(ResizePolicy::Forbid);
    for shard in 0..4 {
        fill(&mut kvs, shard, 40);
    }
    dict_type.set_resize_policy(ResizePolicy::Enable);

    kvs.try_resize_shards(2);
    assert_eq!(kvs.rehashing_shards(), vec![0, 1]);
    kvs.try_resize_shards(2);
    assert_eq!(kvs.rehashing_shards(), vec![0, 1, 2, 3]);
}

#[test]
fn paused_shards_make_no_progress() {
    let mut kvs: KvStore<String, u32> = KvStore::new(1, KvStoreFlags::empty()).unwrap();
    fill(&mut kvs, 0, 100);
    settle(&mut kvs);
    assert!(kvs.shard_expand(0, 4096));
    {
        let mut it = kvs.shard_safe_iter(0);
        assert!(it.next().is_some());
        it.store().incrementally_rehash(100);
        assert_eq!(it.store().rehashing_count(), 1);
    }
    settle(&mut kvs);
    assert_eq!(kvs.shard(0).unwrap().table_size(0), 4096);
}

#[test]
fn rehash_list_operations() {
    let mut list = RehashList::new();
    assert!(list.is_empty());
    assert_eq!(list.front(), None);
    let a = list.push_back(4);
    let b = list.push_back(7);
    let c = list.push_back(9);
    assert_eq!(list.len(), 3);
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![4, 7, 9]);

    assert_eq!(list.remove(b), Some(7));
    assert_eq!(list.remove(b), None);
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![4, 9]);
    assert_eq!(list.remove(a), Some(4));
    assert_eq!(list.front(), Some(9));

    let d = list.push_back(1);
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![9, 1]);
    assert_eq!(list.remove(c), Some(9));
    assert_eq!(list.remove(d), Some(1));
    assert!(list.is_empty());
    assert_eq!(list.iter().count(), 0);

    list.push_back(2);
    list.clear();
    assert_eq!(list.len(), 0);
}
