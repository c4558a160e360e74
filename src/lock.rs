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

//! Named cross-process mutual exclusion (spec component G).
//!
//! Grounded on `examples/other_examples/524ff173_njsmith-posy__src-kvdir.rs.rs`,
//! which solves the same problem (a named lockfile per cache entry guarding
//! a rename-into-place write) with the `fs2` crate's
//! `FileExt::try_lock_exclusive`. We add the timeout polling spec.md §4.7
//! requires, since `fs2` itself only offers blocking or try-once locks.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use errors::*;

/// A held lock; releases (unlocks + drops the file handle) when dropped,
/// so it is released on every exit path, including panics.
pub struct Lock {
    _file: File,
    name: String,
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
    }
}

/// Acquire an exclusive lock on a lockfile named `<dir>/<name>.lock`,
/// creating `dir` and the lockfile if needed, polling until either the
/// lock is acquired or `timeout` elapses.
pub fn acquire(dir: &Path, name: &str, timeout: Duration) -> Result<Lock> {
    fs::create_dir_all(dir).chain_err(|| format!("could not create lock directory {}", dir.display()))?;
    let lock_path: PathBuf = dir.join(format!("{}.lock", name));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .chain_err(|| format!("could not open lockfile {}", lock_path.display()))?;

    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(Lock { _file: file, name: name.to_string() }),
            Err(_) => {
                if Instant::now() >= deadline {
                    return Err(ErrorKind::LockTimeout(name.to_string()).into());
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

impl Lock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The three lock tiers from spec.md §4.7.
pub mod tier {
    /// First-two-hex-char shard name, e.g. object entries under `objects/<aa>/…`.
    pub fn object_shard(shard: &str) -> String {
        format!("shard-{}", shard)
    }
    pub fn manifest(manifest_hash: &str) -> String {
        format!("manifest-{}", manifest_hash)
    }
    pub const STATS: &str = "stats";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        {
            let _lock = acquire(dir.path(), "entry", Duration::from_millis(500)).unwrap();
        }
        // Released on drop; a second acquire must succeed immediately.
        let _lock2 = acquire(dir.path(), "entry", Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn test_acquire_times_out_when_held() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let _held = acquire(dir.path(), "entry", Duration::from_millis(500)).unwrap();
        let result = acquire(dir.path(), "entry", Duration::from_millis(100));
        assert!(result.is_err());
    }
}
