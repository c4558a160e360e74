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

//! The MSVC `cl.exe` argument model and classifier.
//!
//! Grounded on the real `sccache` MSVC frontend
//! (`examples/TimNN-sccache/src/compiler/msvc.rs`) and generalized to the
//! full switch set and splitting rules `spec.md` §3/§4.1 describe.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use compiler::{Classification, PassthroughReason, Switch, SwitchClass};

lazy_static! {
    /// Switches that make a compilation produce extra output files we
    /// don't know how to cache (`cl.exe` equivalents of sccache's
    /// `-FA`/`-Fa`/etc deny-list), or that request a build mode we've
    /// decided not to guess at (`/Yc`, `/Yu`: see spec.md §9).
    static ref DENY_LIST: HashSet<&'static str> = [
        "FA", "Fa", "Fe", "Fm", "FR", "Fx", "Yc", "Yu",
    ].iter().cloned().collect();
}

/// The results of parsing a `cl.exe` commandline (spec.md §3, "Parsed
/// command line").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArguments {
    pub input: PathBuf,
    pub output_obj: PathBuf,
    /// Switches in original order, classified, with output-location
    /// switches already stripped out (tracked separately as `output_obj`).
    pub switches: Vec<Switch>,
    pub z7: bool,
    pub show_includes_requested: bool,
}

/// Split `argv` (after response-file expansion) on each distinct source
/// file, producing one sub-invocation per source, duplicates preserved
/// (spec.md §4.1's SplitMulti tie-break).
fn split_sources(argv: &[String], sources: &[usize]) -> Vec<Vec<String>> {
    sources.iter().map(|&src_idx| {
        argv.iter().enumerate().filter_map(|(i, tok)| {
            if sources.contains(&i) && i != src_idx {
                None
            } else {
                Some(tok.clone())
            }
        }).collect()
    }).collect()
}

/// Classify a fully-expanded `cl.exe` argv.
pub fn classify(argv: &[String]) -> Classification {
    let mut source_indices = Vec::new();
    let mut switches = Vec::new();
    let mut output_arg: Option<String> = None;
    let mut compilation = false;
    let mut link = false;
    let mut zi = false;
    let mut z7 = false;
    let mut ep = false;
    let mut e = false;
    let mut show_includes = false;

    let mut i = 0;
    while i < argv.len() {
        let tok = &argv[i];
        let is_switch = tok.len() > 1 && (tok.starts_with('/') || tok.starts_with('-'));
        if !is_switch {
            source_indices.push(i);
            i += 1;
            continue;
        }
        let body = &tok[1..];
        match body {
            "c" => { compilation = true; i += 1; continue; }
            "link" => { link = true; i += 1; continue; }
            "Zi" => { zi = true; i += 1; continue; }
            "Z7" => { z7 = true; i += 1; continue; }
            "EP" => { ep = true; i += 1; continue; }
            "E" => { e = true; i += 1; continue; }
            "showIncludes" => { show_includes = true; i += 1; continue; }
            _ => {}
        }
        if body == "MP" || (body.starts_with("MP") && body[2..].chars().all(|c| c.is_ascii_digit()) && body.len() > 2) {
            // /MP or /MP<n>: parallelism, dropped by the normalizer later
            // but not cache-impacting; consumed here so it doesn't land in
            // `source_indices`.
            switches.push(Switch { name: "MP".into(), value: Some(body[2..].to_string()), class: SwitchClass::Informational, joined: true });
            i += 1;
            continue;
        }
        if let Some((name, value, class, joined, consumed)) = parse_known_switch(body, argv, i) {
            if DENY_LIST.contains(name.as_str()) {
                return Classification::Passthrough(PassthroughReason::Unsupported(format!("/{}", name)));
            }
            if name == "Fo" {
                output_arg = value.clone();
            }
            switches.push(Switch { name, value, class, joined });
            i += consumed;
            continue;
        }
        if DENY_LIST.contains(body) {
            return Classification::Passthrough(PassthroughReason::Unsupported(format!("/{}", body)));
        }
        // Unrecognized switch: retained verbatim, conservative.
        switches.push(Switch { name: body.to_string(), value: None, class: SwitchClass::Unrecognized, joined: true });
        i += 1;
    }

    if link {
        return Classification::Passthrough(PassthroughReason::Linking);
    }
    if !compilation {
        return Classification::Passthrough(PassthroughReason::NoSourceFile);
    }
    if ep || e {
        return Classification::Passthrough(PassthroughReason::PreprocessorOnly);
    }
    if zi {
        return Classification::Passthrough(PassthroughReason::ExternalDebugInfo);
    }
    if source_indices.is_empty() {
        return Classification::Passthrough(PassthroughReason::NoSourceFile);
    }
    if source_indices.len() > 1 {
        return Classification::SplitMulti(split_sources(argv, &source_indices));
    }

    let input = PathBuf::from(&argv[source_indices[0]]);
    let output_obj = match output_arg {
        Some(o) => resolve_output_obj(&o, &input),
        None => input.with_extension("obj"),
    };

    Classification::Cacheable(ParsedArguments {
        input,
        output_obj,
        switches,
        z7,
        show_includes_requested: show_includes,
    })
}

/// `/Fo` naming a directory gets the source's stem with a `.obj`
/// extension appended (spec.md §4.9 tie-break policy).
fn resolve_output_obj(fo_value: &str, input: &Path) -> PathBuf {
    let p = PathBuf::from(fo_value);
    if fo_value.ends_with('\\') || fo_value.ends_with('/') || p.is_dir() {
        let stem = input.file_stem().unwrap_or_default();
        let mut obj = p;
        obj.push(stem);
        obj.set_extension("obj");
        obj
    } else {
        p
    }
}

/// Switches with a known name and arity. Returns `(name, value, class,
/// joined, tokens_consumed)`.
fn parse_known_switch(body: &str, argv: &[String], i: usize) -> Option<(String, Option<String>, SwitchClass, bool, usize)> {
    // Output-location, joined-or-separate.
    for name in &["Fo", "Fd", "Fp"] {
        if body == *name {
            let (value, consumed) = take_value(argv, i, 1);
            return Some((name.to_string(), value, SwitchClass::OutputLocation, false, consumed));
        }
        if body.starts_with(name) {
            return Some((name.to_string(), Some(body[name.len()..].to_string()), SwitchClass::OutputLocation, true, 1));
        }
    }
    // Preprocessor-affecting with values.
    for name in &["I", "FI", "AI"] {
        if body == *name {
            let (value, consumed) = take_value(argv, i, 1);
            return Some((name.to_string(), value, SwitchClass::PreprocessorAffecting, false, consumed));
        }
        if body.starts_with(name) && body.len() > name.len() {
            return Some((name.to_string(), Some(body[name.len()..].to_string()), SwitchClass::PreprocessorAffecting, true, 1));
        }
    }
    // /D and /U: value may be empty (`/DFOO` has no `=`, `/DFOO=` has an
    // empty value — these are distinct per spec.md §4.9).
    for name in &["D", "U"] {
        if body == *name {
            let (value, consumed) = take_value(argv, i, 1);
            return Some((name.to_string(), value, SwitchClass::PreprocessorAffecting, false, consumed));
        }
        if body.starts_with(name) {
            return Some((name.to_string(), Some(body[name.len()..].to_string()), SwitchClass::PreprocessorAffecting, true, 1));
        }
    }
    if body == "X" {
        return Some(("X".to_string(), None, SwitchClass::PreprocessorAffecting, true, 1));
    }
    // Parallelism/diagnostics, dropped by the normalizer.
    for name in &["showIncludes", "nologo", "FS"] {
        if body == *name {
            return Some((name.to_string(), None, SwitchClass::Informational, true, 1));
        }
    }
    // Code-gen-affecting, retained verbatim.
    if body.starts_with("arch:") {
        return Some(("arch".to_string(), Some(body[5..].to_string()), SwitchClass::CodeGenAffecting, true, 1));
    }
    if body.starts_with("std:") {
        return Some(("std".to_string(), Some(body[4..].to_string()), SwitchClass::CodeGenAffecting, true, 1));
    }
    if body.starts_with('O') && body.len() > 1 && body[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(("O".to_string(), Some(body[1..].to_string()), SwitchClass::CodeGenAffecting, true, 1));
    }
    if body.starts_with("MD") || body.starts_with("MT") {
        return Some((body.to_string(), None, SwitchClass::CodeGenAffecting, true, 1));
    }
    if body.starts_with('W') && body.len() <= 5 {
        return Some((body.to_string(), None, SwitchClass::CodeGenAffecting, true, 1));
    }
    if body.starts_with("EH") {
        return Some((body.to_string(), None, SwitchClass::CodeGenAffecting, true, 1));
    }
    if body == "GL" {
        return Some(("GL".to_string(), None, SwitchClass::CodeGenAffecting, true, 1));
    }
    None
}

/// Consume a switch's value from the following token if `body` named the
/// switch alone (a separated-form invocation, `/Fo foo.obj`).
fn take_value(argv: &[String], i: usize, _arity_hint: usize) -> (Option<String>, usize) {
    match argv.get(i + 1) {
        Some(v) => (Some(v.clone()), 2),
        None => (None, 1),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use compiler::Classification;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_simple() {
        match classify(&argv(&["/c", "/O2", "a.c", "/Foa.obj"])) {
            Classification::Cacheable(p) => {
                assert_eq!(p.input, PathBuf::from("a.c"));
                assert_eq!(p.output_obj, PathBuf::from("a.obj"));
            }
            other => panic!("expected Cacheable, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_link_is_passthrough() {
        assert_eq!(classify(&argv(&["/Fefoo.exe", "foo.obj"])), Classification::Passthrough(PassthroughReason::NoSourceFile));
        assert_eq!(classify(&argv(&["/c", "foo.c", "/link"])), Classification::Passthrough(PassthroughReason::Linking));
    }

    #[test]
    fn test_classify_zi_is_passthrough() {
        assert_eq!(classify(&argv(&["/c", "a.c", "/Zi", "/Foa.obj"])),
                   Classification::Passthrough(PassthroughReason::ExternalDebugInfo));
    }

    #[test]
    fn test_classify_z7_is_cacheable() {
        match classify(&argv(&["/c", "a.c", "/Z7", "/Foa.obj"])) {
            Classification::Cacheable(p) => assert!(p.z7),
            other => panic!("expected Cacheable, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_multi_source_splits_with_duplicates() {
        match classify(&argv(&["/c", "a.c", "a.c", "b.c"])) {
            Classification::SplitMulti(subs) => {
                assert_eq!(subs.len(), 3);
            }
            other => panic!("expected SplitMulti, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_no_source_is_passthrough() {
        assert_eq!(classify(&argv(&["/c", "/O2"])), Classification::Passthrough(PassthroughReason::NoSourceFile));
    }

    #[test]
    fn test_classify_deny_list_switch() {
        match classify(&argv(&["/c", "a.c", "/FA", "/Foa.obj"])) {
            Classification::Passthrough(PassthroughReason::Unsupported(_)) => {}
            other => panic!("expected Unsupported passthrough, got {:?}", other),
        }
    }

    #[test]
    fn test_define_with_and_without_value_are_distinct() {
        let a = classify(&argv(&["/c", "a.c", "/DFOO", "/Foa.obj"]));
        let b = classify(&argv(&["/c", "a.c", "/DFOO=", "/Foa.obj"]));
        let da = match a { Classification::Cacheable(p) => p.switches, _ => panic!() };
        let db = match b { Classification::Cacheable(p) => p.switches, _ => panic!() };
        assert_ne!(da, db);
    }

    #[test]
    fn test_output_to_directory_uses_source_stem() {
        match classify(&argv(&["/c", "sub/a.c", "/Foout/"])) {
            Classification::Cacheable(p) => {
                assert!(p.output_obj.to_string_lossy().contains("a.obj") || p.output_obj == PathBuf::from("out/a.obj"));
            }
            other => panic!("expected Cacheable, got {:?}", other),
        }
    }
}
