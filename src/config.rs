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

//! All environment-driven settings collapse into a single immutable
//! `Config` record, loaded once at startup. No other module reads
//! `std::env` directly.

use directories::ProjectDirs;
use std::env;
use std::path::PathBuf;

use errors::*;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_MANIFEST_CAPACITY: usize = 10;
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 5 * 1024 * 1024 * 1024; // 5 GiB

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for the cache (`CLCACHE_DIR`).
    pub cache_dir: PathBuf,
    /// Path or filename of the real compiler (`CLCACHE_CL`).
    pub real_compiler: Option<PathBuf>,
    /// `CLCACHE_DISABLE`.
    pub disabled: bool,
    /// `CLCACHE_HARDLINK`.
    pub hardlink: bool,
    /// `CLCACHE_COMPRESS`.
    pub compress: bool,
    /// `CLCACHE_COMPRESSLEVEL`, 1..=9.
    pub compress_level: u32,
    /// `CLCACHE_NODIRECT`.
    pub force_indirect: bool,
    /// `CLCACHE_BASEDIR`.
    pub base_dir: Option<PathBuf>,
    /// `CLCACHE_BUILDDIR`.
    pub build_dir: Option<PathBuf>,
    /// `CLCACHE_OBJECT_CACHE_TIMEOUT_MS`.
    pub lock_timeout_ms: u64,
    /// `CLCACHE_SERVER`.
    pub hash_memoizer_enabled: bool,
    /// `CLCACHE_MEMCACHED`, `host:port`.
    pub memcached_addr: Option<String>,
    /// Manifest entries kept per `(source, normalized-cl)` pair.
    pub manifest_capacity: usize,
    /// Automatic eviction threshold; read from the persisted `MaxCacheSize`
    /// record but defaulted here before that record exists.
    pub default_max_cache_size: u64,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let cache_dir = match env::var_os("CLCACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir()?,
        };
        let compress_level = match env::var("CLCACHE_COMPRESSLEVEL") {
            Ok(v) => {
                let level: u32 = v.parse().chain_err(|| "CLCACHE_COMPRESSLEVEL must be an integer")?;
                if level < 1 || level > 9 {
                    bail!("CLCACHE_COMPRESSLEVEL must be between 1 and 9, got {}", level);
                }
                level
            }
            Err(_) => DEFAULT_COMPRESSION_LEVEL,
        };
        let lock_timeout_ms = match env::var("CLCACHE_OBJECT_CACHE_TIMEOUT_MS") {
            Ok(v) => v.parse().chain_err(|| "CLCACHE_OBJECT_CACHE_TIMEOUT_MS must be an integer")?,
            Err(_) => DEFAULT_LOCK_TIMEOUT_MS,
        };
        Ok(Config {
            cache_dir,
            real_compiler: env::var_os("CLCACHE_CL").map(PathBuf::from),
            disabled: env_flag("CLCACHE_DISABLE"),
            hardlink: env_flag("CLCACHE_HARDLINK"),
            compress: env_flag("CLCACHE_COMPRESS"),
            compress_level,
            force_indirect: env_flag("CLCACHE_NODIRECT"),
            base_dir: env::var_os("CLCACHE_BASEDIR").map(PathBuf::from),
            build_dir: env::var_os("CLCACHE_BUILDDIR").map(PathBuf::from),
            lock_timeout_ms,
            hash_memoizer_enabled: env_flag("CLCACHE_SERVER"),
            memcached_addr: env::var("CLCACHE_MEMCACHED").ok(),
            manifest_capacity: DEFAULT_MANIFEST_CAPACITY,
            default_max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var_os(name).is_some()
}

fn default_cache_dir() -> Result<PathBuf> {
    if let Some(home) = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        return Ok(PathBuf::from(home).join("clcache"));
    }
    let dirs = ProjectDirs::from("", "", "clcache")
        .chain_err(|| "could not determine a home directory for the cache")?;
    Ok(dirs.cache_dir().to_path_buf())
}

/// Should logging be enabled, and at what level, per `CLCACHE_LOG`.
pub fn log_level() -> Option<&'static str> {
    match env::var("CLCACHE_LOG") {
        Ok(ref v) if v.eq_ignore_ascii_case("trace") => Some("trace"),
        Ok(ref v) if v.eq_ignore_ascii_case("debug") => Some("debug"),
        Ok(ref v) if v.eq_ignore_ascii_case("warn") => Some("warn"),
        Ok(ref v) if v.eq_ignore_ascii_case("error") => Some("error"),
        Ok(ref v) if !v.is_empty() => Some("debug"),
        Ok(_) => Some("debug"),
        Err(_) => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_level_empty_set_is_debug() {
        env::set_var("CLCACHE_LOG", "1");
        assert_eq!(Some("debug"), log_level());
        env::remove_var("CLCACHE_LOG");
    }

    #[test]
    fn test_log_level_unset() {
        env::remove_var("CLCACHE_LOG");
        assert_eq!(None, log_level());
    }
}
