// Copyright 2016 Mozilla Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Statistics store (spec component H): a single JSON record under the
//! stats lock tier (spec.md §4.7), read-modify-written on every counter
//! bump so concurrent `cl.exe` invocations never lose an increment.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json;

use errors::*;
use lock::{self, tier};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub calls_total: u64,
    pub calls_for_preprocessing: u64,
    pub calls_without_source_file: u64,
    pub calls_for_linking: u64,
    pub calls_for_external_debug_info: u64,
    pub calls_for_multiple_sources: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evicted_misses: u64,
    pub header_changed_misses: u64,
    pub source_changed_misses: u64,
    pub lock_timeouts: u64,
    pub cache_entries: u64,
    pub cache_size: u64,
    pub max_cache_size: u64,
}

pub struct StatsStore {
    path: PathBuf,
    root: PathBuf,
    lock_timeout: Duration,
}

impl StatsStore {
    pub fn new(cache_dir: &Path, lock_timeout: Duration, default_max_cache_size: u64) -> StatsStore {
        let store = StatsStore {
            path: cache_dir.join("stats.json"),
            root: cache_dir.to_path_buf(),
            lock_timeout,
        };
        if !store.path.exists() {
            let mut initial = Stats::default();
            initial.max_cache_size = default_max_cache_size;
            let _ = store.write(&initial);
        }
        store
    }

    pub fn read(&self) -> Result<Stats> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .chain_err(|| ErrorKind::CacheCorruption("unreadable stats record".into())),
            Err(ref e) if e.kind() == ::std::io::ErrorKind::NotFound => Ok(Stats::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, stats: &Stats) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp-atomic-write");
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            f.write_all(&serde_json::to_vec(stats)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Apply `update` to the current record under the stats lock and
    /// persist the result.
    pub fn update<F: FnOnce(&mut Stats)>(&self, update: F) -> Result<()> {
        let _lock = lock::acquire(&self.root, tier::STATS, self.lock_timeout)?;
        let mut stats = self.read()?;
        update(&mut stats);
        self.write(&stats)
    }

    /// `-z`: zero every counter except the size/entry gauges, which track
    /// the actual on-disk state rather than accumulated call history.
    pub fn zero(&self) -> Result<()> {
        self.update(|s| {
            let cache_entries = s.cache_entries;
            let cache_size = s.cache_size;
            let max_cache_size = s.max_cache_size;
            *s = Stats::default();
            s.cache_entries = cache_entries;
            s.cache_size = cache_size;
            s.max_cache_size = max_cache_size;
        })
    }

    pub fn set_max_cache_size(&self, bytes: u64) -> Result<()> {
        self.update(|s| s.max_cache_size = bytes)
    }

    /// Resynchronize `cache_entries`/`cache_size` to reality, called after
    /// a `put` or an eviction pass so `-s` reports accurate gauges even if
    /// a prior process crashed mid-update.
    pub fn set_gauges(&self, cache_entries: u64, cache_size: u64) -> Result<()> {
        self.update(|s| {
            s.cache_entries = cache_entries;
            s.cache_size = cache_size;
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_persists_across_instances() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = StatsStore::new(dir.path(), Duration::from_secs(5), 1024);
        store.update(|s| s.cache_hits += 1).unwrap();
        store.update(|s| s.cache_hits += 1).unwrap();

        let store2 = StatsStore::new(dir.path(), Duration::from_secs(5), 1024);
        assert_eq!(store2.read().unwrap().cache_hits, 2);
    }

    #[test]
    fn test_zero_preserves_gauges() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = StatsStore::new(dir.path(), Duration::from_secs(5), 1024);
        store.update(|s| { s.cache_hits = 5; s.cache_entries = 3; s.cache_size = 900; }).unwrap();
        store.zero().unwrap();
        let stats = store.read().unwrap();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_entries, 3);
        assert_eq!(stats.cache_size, 900);
    }

    #[test]
    fn test_new_store_seeds_default_max_size() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = StatsStore::new(dir.path(), Duration::from_secs(5), 4096);
        assert_eq!(store.read().unwrap().max_cache_size, 4096);
    }
}
