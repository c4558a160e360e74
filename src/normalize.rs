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

//! Command-line normalizer (spec component B): produces the canonical
//! argument sequence that contributes to the cache key, per spec.md §4.2.

use compiler::msvc::ParsedArguments;
use compiler::{Switch, SwitchClass};
use relativize::Relativizer;

/// Whether we're deriving the key from preprocessed text (indirect) or
/// from the source plus hashed headers (direct). Determines whether
/// preprocessor-affecting switches are dropped (already reflected in the
/// preprocessed text) or retained (direct mode needs them to build the
/// include-set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Indirect,
    Direct,
}

/// Build the normalized switch sequence that feeds the cache key.
/// Order is preserved; output locations and dropped switches are
/// removed; preprocessor switches are dropped in indirect mode and
/// relativized-but-retained in direct mode; everything else passes
/// through verbatim.
pub fn normalize(parsed: &ParsedArguments, mode: KeyMode, relativizer: &Relativizer) -> Vec<String> {
    let mut out = Vec::new();
    for switch in &parsed.switches {
        match switch.class {
            SwitchClass::OutputLocation => continue,
            SwitchClass::Informational => continue,
            SwitchClass::PreprocessorAffecting => {
                if mode == KeyMode::Indirect {
                    continue;
                }
                out.push(render(switch, relativizer));
            }
            SwitchClass::CodeGenAffecting | SwitchClass::Unrecognized => {
                out.push(render(switch, relativizer));
            }
        }
    }
    if parsed.z7 {
        out.push("/Z7".to_string());
    }
    out
}

/// Render one switch back to its textual form, relativizing `/I`/`/FI`
/// path values through `relativizer`. Exposed for `driver`, which needs
/// the same rendering both to build cache-key material and (with a
/// no-op relativizer) to re-invoke the real compiler.
pub fn render(switch: &Switch, relativizer: &Relativizer) -> String {
    let value = switch.value.as_ref().map(|v| {
        if switch.name == "I" || switch.name == "FI" {
            relativizer.relativize_str(v)
        } else {
            v.clone()
        }
    });
    match value {
        Some(v) if switch.joined => format!("/{}{}", switch.name, v),
        Some(v) => format!("/{} {}", switch.name, v),
        None => format!("/{}", switch.name),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use compiler::msvc::classify;
    use compiler::Classification;
    use relativize::Relativizer;

    fn parsed(args: &[&str]) -> ParsedArguments {
        let argv: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        match classify(&argv) {
            Classification::Cacheable(p) => p,
            other => panic!("not cacheable: {:?}", other),
        }
    }

    #[test]
    fn test_output_locations_dropped() {
        let p = parsed(&["/c", "a.c", "/Foa.obj", "/Fdfoo.pdb"]);
        let rel = Relativizer::none();
        let n = normalize(&p, KeyMode::Indirect, &rel);
        assert!(!n.iter().any(|s| s.starts_with("/Fo")));
        assert!(!n.iter().any(|s| s.starts_with("/Fd")));
    }

    #[test]
    fn test_indirect_mode_drops_preprocessor_switches() {
        let p = parsed(&["/c", "a.c", "/Foa.obj", "/DFOO", "/IincDir"]);
        let rel = Relativizer::none();
        let n = normalize(&p, KeyMode::Indirect, &rel);
        assert!(n.is_empty());
    }

    #[test]
    fn test_direct_mode_retains_preprocessor_switches_in_order() {
        let p = parsed(&["/c", "a.c", "/Foa.obj", "/DFOO", "/IincDir"]);
        let rel = Relativizer::none();
        let n = normalize(&p, KeyMode::Direct, &rel);
        assert_eq!(n, vec!["/DFOO", "/IincDir"]);
    }

    #[test]
    fn test_codegen_switches_always_retained() {
        let p = parsed(&["/c", "a.c", "/Foa.obj", "/O2", "/EHsc"]);
        let rel = Relativizer::none();
        let n = normalize(&p, KeyMode::Indirect, &rel);
        assert_eq!(n, vec!["/O2", "/EHsc"]);
    }
}
