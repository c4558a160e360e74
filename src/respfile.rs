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

//! Expansion of `@file` response-file arguments, inlined recursively once
//! (cl.exe itself does not support nested `@file`s, and neither do we).

use std::fs;

use errors::*;

/// Expand any `@file` tokens in `argv` into the tokens they contain.
/// Non-`@` tokens pass through unchanged. A second-level `@file` found
/// inside an already-expanded response file is rejected.
pub fn expand(argv: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(argv.len());
    for arg in argv {
        if arg.starts_with('@') {
            let path = &arg[1..];
            let contents = read_response_file(path)?;
            let tokens = split_response_file(&contents);
            for tok in &tokens {
                if tok.starts_with('@') {
                    bail!(ErrorKind::BadArguments(format!(
                        "recursive response file not supported: {}",
                        tok
                    )));
                }
            }
            out.extend(tokens);
        } else {
            out.push(arg.clone());
        }
    }
    Ok(out)
}

fn read_response_file(path: &str) -> Result<String> {
    let bytes = fs::read(path).chain_err(|| format!("could not read response file {}", path))?;
    Ok(decode_bom_sniffed(&bytes))
}

/// Decode a response file's bytes, sniffing for a UTF-16 LE/BE BOM and
/// falling back to UTF-8 (lossily, matching `cl.exe`'s tolerance of
/// non-ASCII response files authored in the local codepage).
fn decode_bom_sniffed(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    let start = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) { 3 } else { 0 };
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Split response-file contents on whitespace, honoring double quotes the
/// way `cl.exe`'s command-line tokenizer does.
fn split_response_file(contents: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for c in contents.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(current.clone());
                    current.clear();
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(split_response_file("-c foo.c -Fofoo.obj"),
                   vec!["-c", "foo.c", "-Fofoo.obj"]);
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(split_response_file("-c \"foo bar.c\" -Fofoo.obj"),
                   vec!["-c", "foo bar.c", "-Fofoo.obj"]);
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"-c foo.c");
        assert_eq!(decode_bom_sniffed(&bytes), "-c foo.c");
    }

    #[test]
    fn test_decode_utf16_le() {
        let mut bytes = vec![0xFF, 0xFE];
        for u in "-c foo.c".encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        assert_eq!(decode_bom_sniffed(&bytes), "-c foo.c");
    }

    #[test]
    fn test_expand_no_at_files() {
        let argv = vec!["-c".to_string(), "foo.c".to_string()];
        assert_eq!(expand(&argv).unwrap(), argv);
    }

    #[test]
    fn test_expand_rejects_recursive() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let path = dir.path().join("args.rsp");
        ::std::fs::write(&path, "-c @nested.rsp").unwrap();
        let argv = vec![format!("@{}", path.to_str().unwrap())];
        assert!(expand(&argv).is_err());
    }
}
