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

//! Error types for the cache pipeline.
//!
//! Per the design principle that cache errors must never fail a build that
//! would otherwise succeed, only `CompilerNotFound` and `ConfigMismatch` are
//! treated as fatal by the driver; everything else is caught, logged, and
//! downgraded to a cache miss or a passthrough.

use std::process;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        /// A lock (object shard, manifest, or statistics) could not be
        /// acquired within the configured timeout.
        LockTimeout(name: String) {
            description("lock acquisition timed out")
            display("timed out waiting for lock '{}'", name)
        }
        /// An object or manifest entry exists but is unreadable or
        /// incomplete; callers should treat this identically to a miss.
        CacheCorruption(what: String) {
            description("cache entry corrupted")
            display("cache corruption: {}", what)
        }
        /// The real compiler executable could not be located.
        CompilerNotFound(path: String) {
            description("compiler executable not found")
            display("compiler executable not found: {}", path)
        }
        /// The cache directory's compression sentinel doesn't match the
        /// current configuration.
        ConfigMismatch(detail: String) {
            description("cache configuration mismatch")
            display("cache configuration mismatch: {}", detail)
        }
        /// A real compiler (or preprocessor) subprocess exited non-zero.
        ProcessError(output: process::Output) {
            description("process exited unsuccessfully")
            display("process exited with status {:?}", output.status.code())
        }
        /// `argv` could not be parsed into a command line at all.
        BadArguments(detail: String) {
            description("could not parse command line")
            display("could not parse command line: {}", detail)
        }
    }
}

/// Exit code used when the real compiler can't be located at all. Chosen
/// to sit outside the range of exit codes `cl.exe` itself produces.
pub const EXIT_COMPILER_NOT_FOUND: i32 = 2;
/// Exit code used when the cache directory's persisted configuration
/// (currently just the compression sentinel) disagrees with the active
/// configuration.
pub const EXIT_CONFIG_MISMATCH: i32 = 3;
