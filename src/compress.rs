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

//! Optional zlib-family compression for stored object files
//! (`CLCACHE_COMPRESS`/`CLCACHE_COMPRESSLEVEL`, spec.md §6).
//!
//! `flate2` is added to the dependency table for this; none of the
//! teacher's archive/compression crates (`zip`, `tar`) are single-blob
//! zlib codecs, and the same gap is filled by `zstd` in
//! `examples/other_examples/65bbf91d_bytecodealliance-wasmtime__crates-cache-src-lib.rs.rs`'s
//! module cache. We keep to zlib, per spec.md's explicit "zlib-family"
//! requirement, rather than adopting wasmtime's zstd choice verbatim.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use errors::*;

pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)
        .chain_err(|| "failed to decompress cached object")?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = b"hello world, this is some object bytes to compress";
        let compressed = compress(data, 6).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(&decompressed[..], &data[..]);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(decompress(b"not zlib data").is_err());
    }
}
