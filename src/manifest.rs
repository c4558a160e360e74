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

//! Direct-mode manifest store (spec component E): maps a
//! `(source path, normalized command line)` pair to up to
//! `manifest_capacity` candidate `(include-set fingerprint, object key)`
//! entries, so a cache lookup can skip running the preprocessor when the
//! include set hasn't changed.
//!
//! Sharded storage and atomic write-then-rename follow the same pattern
//! as `objectstore`, grounded on
//! `examples/other_examples/524ff173_njsmith-posy__src-kvdir.rs.rs` and
//! `examples/other_examples/65bbf91d_bytecodealliance-wasmtime__crates-cache-src-lib.rs.rs`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json;

use errors::*;
use lock::{self, tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub include_set_fingerprint: String,
    pub object_key: String,
    pub last_used_epoch: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ManifestRecord {
    entries: Vec<ManifestEntry>,
}

pub struct ManifestStore {
    root: PathBuf,
    lock_timeout: Duration,
    capacity: usize,
}

impl ManifestStore {
    pub fn new(cache_dir: &Path, lock_timeout: Duration, capacity: usize) -> ManifestStore {
        ManifestStore { root: cache_dir.join("manifests"), lock_timeout, capacity }
    }

    fn path_for(&self, manifest_hash: &str) -> PathBuf {
        self.root.join(&manifest_hash[0..2]).join(format!("{}.json", manifest_hash))
    }

    /// Find the first entry whose fingerprint matches `include_set_fingerprint`
    /// exactly (spec.md §4.5: direct-mode hits require a byte-exact match of
    /// the recorded include set, not just membership).
    pub fn lookup(&self, manifest_hash: &str, include_set_fingerprint: &str) -> Result<Option<String>> {
        let _lock = lock::acquire(&self.root, &tier::manifest(manifest_hash), self.lock_timeout)?;
        let record = self.read_record(manifest_hash)?;
        Ok(record
            .entries
            .iter()
            .find(|e| e.include_set_fingerprint == include_set_fingerprint)
            .map(|e| e.object_key.clone()))
    }

    /// Record a `(include_set_fingerprint, object_key)` pair with a fresh
    /// `last_used_epoch`, then re-sort by recency and truncate to
    /// `capacity` entries per spec.md §3/§4.5 ("ordered by
    /// `last_used_epoch` descending; truncated on insert"). Replaces an
    /// existing entry with the same fingerprint rather than duplicating
    /// it.
    pub fn insert(&self, manifest_hash: &str, include_set_fingerprint: &str, object_key: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(&manifest_hash[0..2]))?;
        let _lock = lock::acquire(&self.root, &tier::manifest(manifest_hash), self.lock_timeout)?;
        let mut record = self.read_record(manifest_hash)?;
        record.entries.retain(|e| e.include_set_fingerprint != include_set_fingerprint);
        // Inserted at the front before the stable sort below, so an entry
        // sharing the same whole-second `last_used_epoch` as another still
        // sorts ahead of it (most-recently-touched wins ties).
        record.entries.insert(0, ManifestEntry {
            include_set_fingerprint: include_set_fingerprint.to_string(),
            object_key: object_key.to_string(),
            last_used_epoch: now_epoch(),
        });
        sort_by_recency(&mut record.entries);
        record.entries.truncate(self.capacity);
        self.write_record(manifest_hash, &record)
    }

    /// Bump an entry's recency without changing membership, used on a
    /// direct-mode hit, and reposition it to the front so the on-disk
    /// ordering keeps reflecting `last_used_epoch` descending.
    pub fn touch(&self, manifest_hash: &str, include_set_fingerprint: &str) -> Result<()> {
        let _lock = lock::acquire(&self.root, &tier::manifest(manifest_hash), self.lock_timeout)?;
        let mut record = self.read_record(manifest_hash)?;
        let found = record.entries.iter().position(|e| e.include_set_fingerprint == include_set_fingerprint);
        if let Some(i) = found {
            let mut entry = record.entries.remove(i);
            entry.last_used_epoch = now_epoch();
            record.entries.insert(0, entry);
            sort_by_recency(&mut record.entries);
            self.write_record(manifest_hash, &record)?;
        }
        Ok(())
    }

    pub fn entry_count(&self, manifest_hash: &str) -> Result<usize> {
        Ok(self.read_record(manifest_hash)?.entries.len())
    }

    fn read_record(&self, manifest_hash: &str) -> Result<ManifestRecord> {
        let path = self.path_for(manifest_hash);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .chain_err(|| ErrorKind::CacheCorruption(format!("unreadable manifest at {}", path.display()))),
            Err(ref e) if e.kind() == ::std::io::ErrorKind::NotFound => Ok(ManifestRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(&self, manifest_hash: &str, record: &ManifestRecord) -> Result<()> {
        let path = self.path_for(manifest_hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp-atomic-write");
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            f.write_all(&serde_json::to_vec(record)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Stable sort, descending by `last_used_epoch`, so the on-disk order
/// always matches spec.md §3's "ordered by `last_used_epoch` descending".
fn sort_by_recency(entries: &mut Vec<ManifestEntry>) {
    entries.sort_by(|a, b| b.last_used_epoch.cmp(&a.last_used_epoch));
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (::tempdir::TempDir, ManifestStore) {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = ManifestStore::new(dir.path(), Duration::from_secs(5), 10);
        (dir, store)
    }

    #[test]
    fn test_insert_then_lookup() {
        let (_dir, store) = store();
        store.insert("deadbeef", "fp1", "objkey1").unwrap();
        assert_eq!(store.lookup("deadbeef", "fp1").unwrap(), Some("objkey1".to_string()));
        assert_eq!(store.lookup("deadbeef", "fp2").unwrap(), None);
    }

    #[test]
    fn test_insert_replaces_same_fingerprint() {
        let (_dir, store) = store();
        store.insert("deadbeef", "fp1", "objkey1").unwrap();
        store.insert("deadbeef", "fp1", "objkey2").unwrap();
        assert_eq!(store.lookup("deadbeef", "fp1").unwrap(), Some("objkey2".to_string()));
        assert_eq!(store.entry_count("deadbeef").unwrap(), 1);
    }

    #[test]
    fn test_truncates_to_capacity() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = ManifestStore::new(dir.path(), Duration::from_secs(5), 3);
        for i in 0..5 {
            store.insert("deadbeef", &format!("fp{}", i), &format!("obj{}", i)).unwrap();
        }
        assert_eq!(store.entry_count("deadbeef").unwrap(), 3);
        // Most recently inserted survive; oldest (fp0, fp1) are evicted.
        assert_eq!(store.lookup("deadbeef", "fp0").unwrap(), None);
        assert_eq!(store.lookup("deadbeef", "fp4").unwrap(), Some("obj4".to_string()));
    }

    #[test]
    fn test_touch_protects_entry_from_truncation() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let store = ManifestStore::new(dir.path(), Duration::from_secs(5), 2);
        store.insert("deadbeef", "fp0", "obj0").unwrap();
        store.insert("deadbeef", "fp1", "obj1").unwrap();
        store.touch("deadbeef", "fp0").unwrap();
        store.insert("deadbeef", "fp2", "obj2").unwrap();
        // fp0 was touched most recently, so fp1 (never touched again) is
        // the one truncated away, not fp0.
        assert_eq!(store.lookup("deadbeef", "fp0").unwrap(), Some("obj0".to_string()));
        assert_eq!(store.lookup("deadbeef", "fp1").unwrap(), None);
        assert_eq!(store.lookup("deadbeef", "fp2").unwrap(), Some("obj2".to_string()));
    }

    #[test]
    fn test_lookup_missing_manifest_is_none() {
        let (_dir, store) = store();
        assert_eq!(store.lookup("nope", "fp").unwrap(), None);
    }
}
