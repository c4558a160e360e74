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

//! BaseDir/BuildDir relativization (spec.md §3): rewrites absolute paths
//! under configured roots to sentinel-prefixed relative forms, so cache
//! entries remain valid after the project tree moves.

use std::path::{Path, PathBuf};

use config::Config;

pub const BASEDIR_SENTINEL: &str = "<BASEDIR>";
pub const BUILDDIR_SENTINEL: &str = "<BUILDDIR>";

#[derive(Debug, Clone)]
pub struct Relativizer {
    base_dir: Option<PathBuf>,
    build_dir: Option<PathBuf>,
}

impl Relativizer {
    pub fn from_config(config: &Config) -> Relativizer {
        Relativizer {
            base_dir: config.base_dir.clone(),
            build_dir: config.build_dir.clone(),
        }
    }

    /// A no-op relativizer, used when neither `CLCACHE_BASEDIR` nor
    /// `CLCACHE_BUILDDIR` is configured.
    pub fn none() -> Relativizer {
        Relativizer { base_dir: None, build_dir: None }
    }

    pub fn relativize(&self, path: &Path) -> String {
        self.relativize_str(&path.to_string_lossy())
    }

    /// Replace a leading base-dir or build-dir prefix with its sentinel.
    /// Matching is case-insensitive (paths are compared the way Windows
    /// treats them) but the stored tail preserves original case.
    pub fn relativize_str(&self, path: &str) -> String {
        if let Some(ref base) = self.base_dir {
            if let Some(tail) = strip_prefix_ci(path, &base.to_string_lossy()) {
                return format!("{}{}", BASEDIR_SENTINEL, tail);
            }
        }
        if let Some(ref build) = self.build_dir {
            if let Some(tail) = strip_prefix_ci(path, &build.to_string_lossy()) {
                return format!("{}{}", BUILDDIR_SENTINEL, tail);
            }
        }
        path.to_string()
    }
}

fn strip_prefix_ci<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    if path.len() < prefix.len() {
        return None;
    }
    let (head, tail) = path.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) {
        Some(tail)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relativize_basedir() {
        let r = Relativizer { base_dir: Some(PathBuf::from("/home/proj")), build_dir: None };
        assert_eq!(r.relativize_str("/home/proj/src/a.c"), format!("{}/src/a.c", BASEDIR_SENTINEL));
    }

    #[test]
    fn test_relativize_unmatched_path_unchanged() {
        let r = Relativizer { base_dir: Some(PathBuf::from("/home/proj")), build_dir: None };
        assert_eq!(r.relativize_str("/other/path/a.c"), "/other/path/a.c");
    }

    #[test]
    fn test_relativize_is_case_insensitive() {
        let r = Relativizer { base_dir: Some(PathBuf::from("C:\\Proj")), build_dir: None };
        assert_eq!(r.relativize_str("c:\\proj\\src\\a.c"), format!("{}\\src\\a.c", BASEDIR_SENTINEL));
    }

    #[test]
    fn test_none_relativizer_is_identity() {
        let r = Relativizer::none();
        assert_eq!(r.relativize_str("/abs/path"), "/abs/path");
    }
}
