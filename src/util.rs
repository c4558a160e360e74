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

//! A stable, streaming 256-bit digest used for cache keys, manifest hashes,
//! and include-set fingerprints.

use byteorder::{BigEndian, WriteBytesExt};
use filetime::FileTime;
use ring::digest;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{self, Read, Write};
use std::path::Path;

use errors::*;

const BUFFER_SIZE: usize = 64 * 1024;

/// A streaming SHA-256 digest with a `std::hash::Hasher`-compatible
/// `write` so it can double as the backing store for `HashToDigest`.
pub struct Digest {
    ctx: digest::Context,
}

impl Digest {
    pub fn new() -> Digest {
        Digest { ctx: digest::Context::new(&digest::SHA256) }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.ctx.update(bytes);
    }

    /// Length-prefixes `bytes` before feeding it in, so that callers can
    /// safely concatenate several hashed components without ambiguity
    /// (`"ab" || "c"` and `"a" || "bc"` must not collide).
    pub fn update_framed(&mut self, bytes: &[u8]) {
        let mut len = [0u8; 8];
        (&mut len[..]).write_u64::<BigEndian>(bytes.len() as u64).unwrap();
        self.ctx.update(&len);
        self.ctx.update(bytes);
    }

    pub fn finish(self) -> String {
        let digest = self.ctx.finish();
        hex(digest.as_ref())
    }

    /// Hash the contents of a file, streaming it in fixed-size blocks.
    pub fn file<P: AsRef<Path>>(path: P) -> Result<String> {
        let mut f = File::open(path)?;
        let mut m = Digest::new();
        let mut buffer = [0; BUFFER_SIZE];
        loop {
            let count = f.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            m.update(&buffer[..count]);
        }
        Ok(m.finish())
    }

    /// Hash a tuple of byte strings as length-prefixed components, so the
    /// result depends on both the content and the boundaries between
    /// components.
    pub fn tuple(parts: &[&[u8]]) -> String {
        let mut m = Digest::new();
        for part in parts {
            m.update_framed(part);
        }
        m.finish()
    }
}

/// A stable identifier for the compiler executable: its file size and
/// modification timestamp (spec.md §3), not its content. The cache key's
/// compiler-identity component only needs to notice a compiler upgrade,
/// not fingerprint the binary, so this avoids hashing the (often large)
/// `cl.exe`/toolset DLLs on every invocation.
pub fn compiler_identity<P: AsRef<Path>>(path: P) -> Result<String> {
    let metadata = fs::metadata(path.as_ref())
        .chain_err(|| format!("could not stat compiler executable {}", path.as_ref().display()))?;
    let size = metadata.len();
    let mtime = FileTime::from_last_modification_time(&metadata).seconds();

    let mut size_bytes = [0u8; 8];
    (&mut size_bytes[..]).write_u64::<BigEndian>(size).unwrap();
    let mut mtime_bytes = [0u8; 8];
    (&mut mtime_bytes[..]).write_i64::<BigEndian>(mtime).unwrap();

    Ok(Digest::tuple(&[&size_bytes[..], &mtime_bytes[..]]))
}

impl Write for Digest {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.update(bytes);
        Ok(bytes.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Adapts a `Digest` to the `std::hash::Hasher` trait so that `OsStr`,
/// `String`, and other `Hash` implementors can be fed into it directly via
/// `value.hash(&mut HashToDigest { digest: &mut m })`.
pub struct HashToDigest<'a> {
    pub digest: &'a mut Digest,
}

impl<'a> Hasher for HashToDigest<'a> {
    fn finish(&self) -> u64 {
        panic!("HashToDigest doesn't support finish()");
    }
    fn write(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_framed_avoids_prefix_collision() {
        let a = Digest::tuple(&[b"ab", b"c"]);
        let b = Digest::tuple(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_is_stable() {
        let mut m1 = Digest::new();
        m1.update(b"hello world");
        let mut m2 = Digest::new();
        m2.update(b"hello world");
        assert_eq!(m1.finish(), m2.finish());
    }

    #[test]
    fn test_digest_is_64_hex_chars() {
        let mut m = Digest::new();
        m.update(b"anything");
        assert_eq!(64, m.finish().len());
    }

    #[test]
    fn test_compiler_identity_stable_for_unchanged_file() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let path = dir.path().join("cl.exe");
        ::std::fs::write(&path, b"not a real compiler").unwrap();
        let a = compiler_identity(&path).unwrap();
        let b = compiler_identity(&path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compiler_identity_changes_with_size() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let path = dir.path().join("cl.exe");
        ::std::fs::write(&path, b"short").unwrap();
        let short = compiler_identity(&path).unwrap();
        ::std::fs::write(&path, b"a much longer replacement").unwrap();
        let long = compiler_identity(&path).unwrap();
        assert_ne!(short, long);
    }
}
