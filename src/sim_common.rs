use std::str::FromStr;
use std::time::Instant;

use failure::Fail;
use log::{debug, info, LevelFilter};
use serde::Serialize;
use structopt::StructOpt;

use crate::common::InstantExt;
use crate::errors::{KvError, Result};
use crate::store::MAX_SHARD_BITS;
use crate::{KvStore, KvStoreFlags, KvStoreInfo, ScanAction};

#[derive(Debug, StructOpt, Clone)]
#[structopt(name = "kvstore-sim",
about = env ! ("CARGO_PKG_DESCRIPTION"),
author = env ! ("CARGO_PKG_AUTHORS"),
version = env ! ("CARGO_PKG_VERSION"))]
pub struct SimOpt {
    /// the kvstore gets 2^shard-bits shards.
    #[structopt(default_value = "4", long = "--shard-bits")]
    pub shard_bits: u32,
    #[structopt(default_value = "10000", long = "--keys")]
    pub keys: usize,
    /// share of the keys deleted after the inserts.
    #[structopt(default_value = "50", long = "--delete-percent")]
    pub delete_percent: u8,
    /// microseconds of rehashing per cron round.
    #[structopt(default_value = "1000", long = "--rehash-budget-us")]
    pub rehash_budget_us: u64,
    /// shards offered a resize per cron round.
    #[structopt(default_value = "16", long = "--resize-limit")]
    pub resize_limit: usize,
    /// fair random shard draws to make.
    #[structopt(default_value = "1000", long = "--samples")]
    pub samples: usize,
    #[structopt(long = "--on-demand")]
    pub on_demand: bool,
    #[structopt(long = "--free-empty")]
    pub free_empty: bool,
    #[structopt(long = "--key-sizes")]
    pub key_sizes: bool,
    #[structopt(
    default_value = "text",
    parse(try_from_str = str::parse),
    long = "--format"
    )]
    pub format: OutputFormat,
    #[structopt(long = "--full-stats")]
    pub full_stats: bool,
    #[structopt(
    default_value = "warn",
    parse(try_from_str = str::parse),
    long = "--log-level"
    )]
    pub log_level: LevelFilter,
}

impl SimOpt {
    pub fn flags(&self) -> KvStoreFlags {
        let mut flags = KvStoreFlags::empty();
        flags.set(KvStoreFlags::ALLOCATE_SHARDS_ON_DEMAND, self.on_demand);
        flags.set(KvStoreFlags::FREE_EMPTY_SHARDS, self.free_empty);
        flags.set(KvStoreFlags::ALLOC_META_KEYS_HIST, self.key_sizes);
        flags
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy, Fail)]
#[fail(display = "No such output format")]
pub struct NoSuchFormat;

impl FromStr for OutputFormat {
    type Err = NoSuchFormat;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(NoSuchFormat)
        }
    }
}

/// What a simulation did, and the kvstore counters along the way.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub inserted: usize,
    pub deleted: usize,
    pub scanned: usize,
    pub scan_calls: usize,
    pub cron_rounds: usize,
    pub rehash_us: u64,
    /// how many fair random draws landed on each shard.
    pub shard_draws: Vec<usize>,
    pub after_insert: KvStoreInfo,
    pub after_delete: KvStoreInfo,
    pub key_size_bins: Option<Vec<u64>>,
    pub stats: String,
}

fn key_of(i: usize) -> String {
    format!("key:{:08}", i)
}

struct Cron {
    rounds: usize,
    rehash_us: u64,
}

impl Cron {
    /// run full passes of cron rounds until no shard is left rehashing.
    fn settle(&mut self, kvs: &mut KvStore<String, usize>, opt: &SimOpt) {
        let limit = opt.resize_limit.max(1);
        let rounds_per_pass = (kvs.num_shards() + limit - 1) / limit;
        loop {
            for _ in 0..rounds_per_pass {
                kvs.try_resize_shards(limit);
                self.rehash_us += kvs.incrementally_rehash(opt.rehash_budget_us);
                self.rounds += 1;
            }
            if kvs.rehashing_count() == 0 {
                break;
            }
        }
        debug!("settled after {} cron rounds", self.rounds);
    }
}

/// Fill a kvstore, delete part of it, scan what is left and sample it.
pub fn run(opt: &SimOpt) -> Result<SimReport> {
    if opt.shard_bits > MAX_SHARD_BITS {
        return Err(KvError::Other {
            reason: format!("--shard-bits must be at most {}, got {}", MAX_SHARD_BITS, opt.shard_bits)
        });
    }
    let timer = Instant::now();
    let mut kvs: KvStore<String, usize> = KvStore::new(opt.shard_bits, opt.flags())?;
    let mut cron = Cron { rounds: 0, rehash_us: 0 };

    let mut inserted = 0;
    for i in 0..opt.keys {
        let key = key_of(i);
        let shard = kvs.shard_for(key.as_str());
        let len = key.len() as u64;
        if kvs.shard_add_raw(shard, key, i).is_ok() {
            kvs.record_key_size_change(shard, 0, len);
            inserted += 1;
        }
    }
    cron.settle(&mut kvs, opt);
    let after_insert = kvs.info();
    info!("inserted {} keys into {} shards", inserted, kvs.num_shards());

    let to_delete = opt.keys * opt.delete_percent.min(100) as usize / 100;
    let mut deleted = 0;
    for i in 0..to_delete {
        let key = key_of(i);
        let shard = kvs.shard_for(key.as_str());
        if kvs.shard_delete(shard, key.as_str()).is_some() {
            kvs.record_key_size_change(shard, key.len() as u64, 0);
            deleted += 1;
        }
    }
    cron.settle(&mut kvs, opt);
    let after_delete = kvs.info();
    info!("deleted {} keys", deleted);

    let mut scanned = 0;
    let mut scan_calls = 0;
    let mut cursor = 0;
    loop {
        cursor = kvs.scan(cursor, None, |_, _| {
            scanned += 1;
            ScanAction::Keep
        }, None);
        scan_calls += 1;
        if cursor == 0 {
            break;
        }
    }

    let mut shard_draws = vec![0; kvs.num_shards()];
    if kvs.size() > 0 {
        for _ in 0..opt.samples {
            shard_draws[kvs.fair_random_shard_index()] += 1;
        }
    }

    info!("simulation took {}us", timer.elapsed_us());
    Ok(SimReport {
        inserted,
        deleted,
        scanned,
        scan_calls,
        cron_rounds: cron.rounds,
        rehash_us: cron.rehash_us,
        shard_draws,
        after_insert,
        after_delete,
        key_size_bins: kvs.key_sizes().map(|hist| hist.bins().to_vec()),
        stats: kvs.stats_message(opt.full_stats),
    })
}

impl SimReport {
    pub fn to_text(&self) -> String {
        let mut text = format!(
            "inserted: {}\ndeleted: {}\nscanned: {} in {} calls\ncron rounds: {} ({}us rehashing)\n",
            self.inserted, self.deleted, self.scanned, self.scan_calls, self.cron_rounds, self.rehash_us
        );
        text.push_str(&format!("keys: {}\nbuckets: {}\nnon-empty shards: {}/{}\nmemory: {}\n",
                               self.after_delete.keys, self.after_delete.buckets,
                               self.after_delete.non_empty_shards, self.after_delete.shards,
                               self.after_delete.memory));
        text.push_str(&self.stats);
        text
    }
}
