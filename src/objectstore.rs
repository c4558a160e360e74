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

//! Content-addressed object store (spec component F): sharded directory
//! layout, per-shard locking, atomic rename-into-place writes, LRU-style
//! eviction.
//!
//! The directory layout is grounded on the documented cargo cache layout
//! (`examples/other_examples/9cd06693_Hackzzila-cargo__src-cargo-core-compiler-cache_layout.rs.rs`);
//! the atomic write-then-rename and sharded/locked entry design follow
//! `examples/other_examples/524ff173_njsmith-posy__src-kvdir.rs.rs` and
//! `examples/other_examples/65bbf91d_bytecodealliance-wasmtime__crates-cache-src-lib.rs.rs`'s
//! `fs_write_atomic`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json;
use tempdir::TempDir;

use compress;
use errors::*;
use lock::{self, tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub created_epoch: u64,
    pub last_used_epoch: u64,
    pub original_size: u64,
    pub stored_size: u64,
    pub compressed: bool,
}

/// A handle to an on-disk object entry. Cheap to hold; the actual file
/// reads happen in `materialize`/`stdout`/`stderr`/`exit_code`.
pub struct Entry {
    dir: PathBuf,
    pub meta: ObjectMeta,
}

impl Entry {
    /// Write the object file to `dest`, hardlinking when `hardlink` is
    /// set and the destination is on the same volume, falling back to a
    /// copy otherwise.
    pub fn materialize(&self, dest: &Path) -> Result<()> {
        self.materialize_with_hardlink(dest, false)
    }

    pub fn materialize_with_hardlink(&self, dest: &Path, hardlink: bool) -> Result<()> {
        let object_path = self.dir.join("object");
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.meta.compressed {
            let compressed = fs::read(&object_path)
                .chain_err(|| ErrorKind::CacheCorruption(format!("missing object at {}", object_path.display())))?;
            let raw = compress::decompress(&compressed)
                .chain_err(|| ErrorKind::CacheCorruption("could not decompress stored object".into()))?;
            fs::write(dest, raw)?;
            return Ok(());
        }
        if hardlink {
            if fs::hard_link(&object_path, dest).is_ok() {
                return Ok(());
            }
            // Hardlink failed (likely cross-volume); fall back to copy.
        }
        fs::copy(&object_path, dest)
            .chain_err(|| ErrorKind::CacheCorruption(format!("missing object at {}", object_path.display())))?;
        Ok(())
    }

    pub fn stdout(&self) -> Result<Vec<u8>> {
        read_or_corrupt(&self.dir.join("output.txt"))
    }

    pub fn stderr(&self) -> Result<Vec<u8>> {
        read_or_corrupt(&self.dir.join("stderr.txt"))
    }

    pub fn exit_code(&self) -> Result<i32> {
        let bytes = read_or_corrupt(&self.dir.join("exit_code"))?;
        String::from_utf8_lossy(&bytes).trim().parse()
            .chain_err(|| ErrorKind::CacheCorruption("unreadable exit_code".into()))
    }
}

fn read_or_corrupt(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).chain_err(|| ErrorKind::CacheCorruption(format!("missing {}", path.display())))
}

pub struct PutResult {
    pub stored_size: u64,
}

pub struct ObjectStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl ObjectStore {
    pub fn new(cache_dir: &Path, lock_timeout: Duration) -> ObjectStore {
        ObjectStore { root: cache_dir.join("objects"), lock_timeout }
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(&key[0..2]).join(&key[2..])
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        self.root.join(&key[0..2])
    }

    fn lock_root(&self) -> PathBuf {
        self.root.clone()
    }

    /// Look up `key`. Short critical section per spec.md §4.7: the shard
    /// lock only guards the existence check and meta read, not the later
    /// file materialization.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        let _lock = lock::acquire(&self.lock_root(), &tier::object_shard(&key[0..2]), self.lock_timeout)?;
        let dir = self.entry_dir(key);
        let meta_path = dir.join("meta");
        if !meta_path.exists() {
            return Ok(None);
        }
        match read_meta(&meta_path) {
            Ok(meta) => Ok(Some(Entry { dir, meta })),
            Err(_) => {
                // Corrupt entry: best-effort cleanup, treat as absent.
                let _ = fs::remove_dir_all(&dir);
                Ok(None)
            }
        }
    }

    pub fn touch(&self, key: &str) -> Result<()> {
        let _lock = lock::acquire(&self.lock_root(), &tier::object_shard(&key[0..2]), self.lock_timeout)?;
        let dir = self.entry_dir(key);
        let meta_path = dir.join("meta");
        let mut meta = match read_meta(&meta_path) {
            Ok(m) => m,
            Err(_) => return Ok(()), // entry vanished concurrently; nothing to touch
        };
        meta.last_used_epoch = now_epoch();
        write_atomic(&meta_path, &serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    pub fn put(
        &self,
        key: &str,
        object_bytes: &[u8],
        stdout: &[u8],
        stderr: &[u8],
        exit_code: i32,
        compress_objects: bool,
        compress_level: u32,
    ) -> Result<PutResult> {
        let shard = self.shard_dir(key);
        fs::create_dir_all(&shard)?;
        let _lock = lock::acquire(&self.lock_root(), &tier::object_shard(&key[0..2]), self.lock_timeout)?;

        let staging = TempDir::new_in(&shard, "wip").chain_err(|| "could not create staging directory")?;
        let (object_data, compressed) = if compress_objects {
            (compress::compress(object_bytes, compress_level)?, true)
        } else {
            (object_bytes.to_vec(), false)
        };
        let stored_size = object_data.len() as u64;

        write_fsync(&staging.path().join("object"), &object_data)?;
        write_fsync(&staging.path().join("output.txt"), stdout)?;
        write_fsync(&staging.path().join("stderr.txt"), stderr)?;
        write_fsync(&staging.path().join("exit_code"), exit_code.to_string().as_bytes())?;

        let now = now_epoch();
        let meta = ObjectMeta {
            created_epoch: now,
            last_used_epoch: now,
            original_size: object_bytes.len() as u64,
            stored_size,
            compressed,
        };
        write_fsync(&staging.path().join("meta"), &serde_json::to_vec(&meta)?)?;

        let dest = self.entry_dir(key);
        let _ = fs::remove_dir_all(&dest);
        fs::rename(staging.into_path(), &dest)
            .chain_err(|| format!("could not rename object entry into place at {}", dest.display()))?;

        Ok(PutResult { stored_size })
    }

    /// Sum of `stored_size` across every entry, by walking the shard
    /// tree. Used to seed `CacheSize` on first start and to validate
    /// eviction's postcondition.
    pub fn total_size(&self) -> u64 {
        self.iter_entries().map(|(_, meta)| meta.stored_size).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.iter_entries().count()
    }

    /// Evict entries, oldest `last_used_epoch` first, until the total
    /// stored size is at most `0.9 * max_size` (spec.md §4.6). Tolerates
    /// entries disappearing mid-scan; only ever holds per-entry locks.
    pub fn evict_to(&self, max_size: u64) -> Result<EvictionReport> {
        let mut entries: Vec<(String, ObjectMeta)> = self.iter_entries().collect();
        entries.sort_by_key(|(_, meta)| meta.last_used_epoch);

        let mut total: u64 = entries.iter().map(|(_, m)| m.stored_size).sum();
        let target = (max_size as f64 * 0.9) as u64;
        let mut removed = 0usize;
        for (key, meta) in entries {
            if total <= target {
                break;
            }
            let shard = &key[0..2];
            if let Ok(_lock) = lock::acquire(&self.lock_root(), &tier::object_shard(shard), self.lock_timeout) {
                let dir = self.entry_dir(&key);
                if fs::remove_dir_all(&dir).is_ok() {
                    total = total.saturating_sub(meta.stored_size);
                    removed += 1;
                }
            }
        }
        Ok(EvictionReport { removed, remaining_size: total })
    }

    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn iter_entries<'a>(&'a self) -> Box<Iterator<Item = (String, ObjectMeta)> + 'a> {
        let shards = match fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(_) => return Box::new(Vec::new().into_iter()),
        };
        let mut out = Vec::new();
        for shard_entry in shards.filter_map(|e| e.ok()) {
            let shard_name = match shard_entry.file_name().into_string() {
                Ok(s) => s,
                Err(_) => continue,
            };
            let rests = match fs::read_dir(shard_entry.path()) {
                Ok(d) => d,
                Err(_) => continue,
            };
            for rest_entry in rests.filter_map(|e| e.ok()) {
                let rest_name = match rest_entry.file_name().into_string() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if rest_name.starts_with("wip") {
                    continue; // stray staging directory from an aborted put
                }
                let meta_path = rest_entry.path().join("meta");
                if let Ok(meta) = read_meta(&meta_path) {
                    out.push((format!("{}{}", shard_name, rest_name), meta));
                }
            }
        }
        Box::new(out.into_iter())
    }
}

pub struct EvictionReport {
    pub removed: usize,
    pub remaining_size: u64,
}

fn read_meta(path: &Path) -> Result<ObjectMeta> {
    let bytes = fs::read(path).chain_err(|| ErrorKind::CacheCorruption(format!("missing meta at {}", path.display())))?;
    serde_json::from_slice(&bytes).chain_err(|| ErrorKind::CacheCorruption(format!("unreadable meta at {}", path.display())))
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn write_fsync(path: &Path, data: &[u8]) -> Result<()> {
    let mut f = File::create(path)?;
    f.write_all(data)?;
    f.sync_all()?;
    Ok(())
}

/// Write-to-temp-then-rename, used for single-file updates (the `meta`
/// record on `touch`) where a whole staging directory would be overkill.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp-atomic-write");
    {
        let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
