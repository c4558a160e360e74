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

//! Orchestration (spec component I): classify, derive a cache key in
//! direct or indirect mode, consult the object store, and fall back to
//! invoking the real compiler on a miss. Straight-line, blocking, no
//! background threads: one process handles exactly one `cl.exe`
//! invocation and exits.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use cache::Cache;
use compiler::msvc::{self, ParsedArguments};
use compiler::{Classification, PassthroughReason, SwitchClass};
use config::Config;
use errors::*;
use includes::{self, HashMemoizer, NoopMemoizer, PrefixCache};
use normalize::{self, KeyMode};
use relativize::Relativizer;
use respfile;
use util;

/// The outcome of running one (possibly split) compiler invocation.
pub struct Outcome {
    pub exit_code: i32,
}

pub fn run(argv: &[String], config: &Config, cache: &Cache) -> Result<Outcome> {
    let compiler = locate_compiler(config)?;

    if config.disabled {
        cache.stats.update(|s| s.calls_total += 1)?;
        return passthrough(&compiler, argv, None);
    }

    let expanded = respfile::expand(argv)?;
    cache.stats.update(|s| s.calls_total += 1)?;

    let result = match msvc::classify(&expanded) {
        Classification::Passthrough(reason) => {
            bump_passthrough_stat(cache, &reason)?;
            return passthrough(&compiler, &expanded, None);
        }
        Classification::SplitMulti(subcommands) => {
            cache.stats.update(|s| s.calls_for_multiple_sources += 1)?;
            run_split(&compiler, &subcommands, config, cache)
        }
        Classification::Cacheable(parsed) => run_cacheable(&compiler, &parsed, config, cache),
    };

    handle_lock_timeout(result, &compiler, &expanded, cache)
}

/// A lock-acquisition timeout anywhere in the cache path (manifest,
/// object shard, or statistics) is non-fatal for the build (spec.md
/// §4.7, §7): log it, bump a dedicated counter, and fall back to a
/// direct compiler invocation instead of letting the error fail the
/// build.
fn handle_lock_timeout(result: Result<Outcome>, compiler: &Path, argv: &[String], cache: &Cache) -> Result<Outcome> {
    let err = match result {
        Err(e) => e,
        ok => return ok,
    };
    if let ErrorKind::LockTimeout(ref name) = *err.kind() {
        warn!("lock '{}' timed out; bypassing cache for this invocation", name);
        cache.stats.update(|s| s.lock_timeouts += 1)?;
        return passthrough(compiler, argv, None);
    }
    Err(err)
}

fn bump_passthrough_stat(cache: &Cache, reason: &PassthroughReason) -> Result<()> {
    cache.stats.update(|s| {
        match *reason {
            PassthroughReason::Linking => s.calls_for_linking += 1,
            PassthroughReason::NoSourceFile => s.calls_without_source_file += 1,
            PassthroughReason::ExternalDebugInfo => s.calls_for_external_debug_info += 1,
            PassthroughReason::PreprocessorOnly => s.calls_for_preprocessing += 1,
            // Disabled/Unsupported have no dedicated counter in spec.md §3;
            // they still count toward CallsTotal (bumped unconditionally in
            // `run`) but must not inflate CallsForLinking.
            PassthroughReason::Disabled | PassthroughReason::Unsupported(_) => {}
        }
    })
}

/// Run each split sub-invocation in turn (spec.md §4.1: `/MP` or
/// multiple sources on one command line act as independent compiles).
/// Stops at the first failure, matching `cl.exe`'s own behavior of
/// aborting a multi-source build on the first error.
fn run_split(compiler: &Path, subcommands: &[Vec<String>], config: &Config, cache: &Cache) -> Result<Outcome> {
    for sub in subcommands {
        match msvc::classify(sub) {
            Classification::Cacheable(parsed) => {
                let outcome = run_cacheable(compiler, &parsed, config, cache)?;
                if outcome.exit_code != 0 {
                    return Ok(outcome);
                }
            }
            Classification::Passthrough(reason) => {
                bump_passthrough_stat(cache, &reason)?;
                let outcome = passthrough(compiler, sub, None)?;
                if outcome.exit_code != 0 {
                    return Ok(outcome);
                }
            }
            Classification::SplitMulti(_) => unreachable!("a single-source sub-invocation cannot split again"),
        }
    }
    Ok(Outcome { exit_code: 0 })
}

fn run_cacheable(compiler: &Path, parsed: &ParsedArguments, config: &Config, cache: &Cache) -> Result<Outcome> {
    let relativizer = Relativizer::from_config(config);
    let cwd = env::current_dir().chain_err(|| "could not determine current directory")?;
    let compiler_digest = util::compiler_identity(compiler)?;

    let preprocessor_switches: Vec<String> = parsed
        .switches
        .iter()
        .filter(|s| s.class == SwitchClass::PreprocessorAffecting)
        .map(|s| normalize::render(s, &Relativizer::none()))
        .collect();

    if config.force_indirect {
        return run_indirect(compiler, parsed, &preprocessor_switches, &cwd, &compiler_digest, config, cache);
    }

    let prefix_cache_path = config.cache_dir.join("showincludes_prefixes.json");
    let mut prefix_cache = PrefixCache::load(&prefix_cache_path);
    let prefix = match prefix_cache.get(&compiler_digest) {
        Some(p) => p.to_string(),
        None => {
            let detected = includes::detect_showincludes_prefix(compiler, &cwd)?;
            prefix_cache.insert(compiler_digest.clone(), detected.clone());
            prefix_cache.save(&prefix_cache_path)?;
            detected
        }
    };

    // CLCACHE_SERVER names an external hash-memoization adapter; only its
    // interface (HashMemoizer) is in scope here, so anything other than
    // the noop implementation is a configuration no-op for now.
    if config.hash_memoizer_enabled {
        debug!("CLCACHE_SERVER is set but no external hash memoizer is wired up; using an in-process no-op");
    }
    let memoizer = NoopMemoizer;
    let scan_result = includes::scan(compiler, &parsed.input, &preprocessor_switches, &cwd, &prefix, &memoizer, &relativizer);

    let include_set = match scan_result {
        Ok(set) => set,
        Err(_) => {
            // The scan failed outright (source doesn't compile, or
            // `/showIncludes` produced no parseable output at all); fall
            // back to indirect mode rather than treating this as a
            // cache-layer failure. `run_indirect`'s own miss path records
            // the dedicated `SourceChangedMisses` counter spec.md §4.4
            // calls for.
            return run_indirect(compiler, parsed, &preprocessor_switches, &cwd, &compiler_digest, config, cache);
        }
    };

    let normalized_direct = normalize::normalize(parsed, KeyMode::Direct, &relativizer).join("\x1f");
    let source_rel = relativizer.relativize(&parsed.input);
    let manifest_hash = util::Digest::tuple(&[compiler_digest.as_bytes(), source_rel.as_bytes(), normalized_direct.as_bytes()]);

    if let Some(object_key) = cache.manifests.lookup(&manifest_hash, &include_set.fingerprint)? {
        match cache.objects.get(&object_key)? {
            Some(entry) => {
                materialize_hit(&entry, &parsed.output_obj, cache)?;
                cache.manifests.touch(&manifest_hash, &include_set.fingerprint)?;
                cache.objects.touch(&object_key)?;
                return Ok(Outcome { exit_code: entry.exit_code()? });
            }
            None => {
                cache.stats.update(|s| { s.evicted_misses += 1; s.cache_misses += 1; })?;
            }
        }
    } else {
        let had_any_entries = cache.manifests.entry_count(&manifest_hash)? > 0;
        cache.stats.update(|s| {
            s.cache_misses += 1;
            if had_any_entries {
                s.header_changed_misses += 1;
            } else {
                s.source_changed_misses += 1;
            }
        })?;
    }

    let object_key = util::Digest::tuple(&[manifest_hash.as_bytes(), include_set.fingerprint.as_bytes()]);
    let outcome = compile_and_store(compiler, parsed, &object_key, cache)?;
    if outcome.exit_code == 0 {
        cache.manifests.insert(&manifest_hash, &include_set.fingerprint, &object_key)?;
    }
    Ok(outcome)
}

fn run_indirect(
    compiler: &Path,
    parsed: &ParsedArguments,
    preprocessor_switches: &[String],
    cwd: &Path,
    compiler_digest: &str,
    config: &Config,
    cache: &Cache,
) -> Result<Outcome> {
    let relativizer = Relativizer::from_config(config);
    let output = Command::new(compiler)
        .arg("/nologo")
        .arg("/EP")
        .args(preprocessor_switches)
        .arg(&parsed.input)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .chain_err(|| "failed to spawn compiler for preprocessing")?;
    if !output.status.success() {
        bail!(ErrorKind::ProcessError(output));
    }

    // The preprocessed text embeds absolute paths (line markers, __FILE__
    // expansions) under BaseDir/BuildDir; relativize it the same way the
    // normalized command line is, so indirect-mode keys survive a project
    // move (spec.md §3).
    let preprocessed_text = String::from_utf8_lossy(&output.stdout);
    let relativized_preprocessed = relativizer.relativize_str(&preprocessed_text);

    let normalized_indirect = normalize::normalize(parsed, KeyMode::Indirect, &relativizer).join("\x1f");
    let preprocessed_hash = util::Digest::tuple(&[relativized_preprocessed.as_bytes()]);
    let object_key = util::Digest::tuple(&[
        compiler_digest.as_bytes(),
        normalized_indirect.as_bytes(),
        preprocessed_hash.as_bytes(),
    ]);

    match cache.objects.get(&object_key)? {
        Some(entry) => {
            materialize_hit(&entry, &parsed.output_obj, cache)?;
            cache.objects.touch(&object_key)?;
            Ok(Outcome { exit_code: entry.exit_code()? })
        }
        None => {
            cache.stats.update(|s| { s.cache_misses += 1; s.source_changed_misses += 1; })?;
            compile_and_store(compiler, parsed, &object_key, cache)
        }
    }
}

fn materialize_hit(entry: &::objectstore::Entry, dest: &Path, cache: &Cache) -> Result<()> {
    entry.materialize_with_hardlink(dest, cache.hardlink)?;
    let stdout = entry.stdout()?;
    let stderr = entry.stderr()?;
    use std::io::Write;
    ::std::io::stdout().write_all(&stdout).ok();
    ::std::io::stderr().write_all(&stderr).ok();
    cache.stats.update(|s| s.cache_hits += 1)
}

fn compile_and_store(compiler: &Path, parsed: &ParsedArguments, object_key: &str, cache: &Cache) -> Result<Outcome> {
    let mut argv: Vec<String> = vec!["/c".to_string(), "/nologo".to_string()];
    for switch in &parsed.switches {
        // The resolved `/Fo<output_obj>` is appended explicitly below,
        // using the directory-to-filename resolution `classify` already
        // performed; re-emitting the switch's original (possibly
        // directory-only) value here would just confuse `cl.exe` about
        // which one wins.
        if switch.class == SwitchClass::OutputLocation && switch.name == "Fo" {
            continue;
        }
        argv.push(normalize::render(switch, &Relativizer::none()));
    }
    if parsed.z7 {
        argv.push("/Z7".to_string());
    }
    argv.push(format!("/Fo{}", parsed.output_obj.display()));
    argv.push(parsed.input.to_string_lossy().into_owned());

    let output = Command::new(compiler)
        .args(&argv)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .chain_err(|| "failed to spawn compiler")?;

    use std::io::Write;
    ::std::io::stdout().write_all(&output.stdout).ok();
    ::std::io::stderr().write_all(&output.stderr).ok();

    if !output.status.success() {
        return Ok(Outcome { exit_code: output.status.code().unwrap_or(1) });
    }

    let object_bytes = fs::read(&parsed.output_obj)
        .chain_err(|| format!("compiler reported success but {} is missing", parsed.output_obj.display()))?;
    cache.objects.put(
        object_key,
        &object_bytes,
        &output.stdout,
        &output.stderr,
        0,
        cache.compress,
        cache.compress_level,
    )?;
    cache.maybe_evict()?;

    Ok(Outcome { exit_code: 0 })
}

fn passthrough(compiler: &Path, argv: &[String], _reason: Option<&PassthroughReason>) -> Result<Outcome> {
    let status = Command::new(compiler)
        .args(argv)
        .status()
        .chain_err(|| "failed to spawn real compiler")?;
    Ok(Outcome { exit_code: status.code().unwrap_or(1) })
}

fn locate_compiler(config: &Config) -> Result<PathBuf> {
    if let Some(ref path) = config.real_compiler {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(ErrorKind::CompilerNotFound(path.to_string_lossy().into_owned()).into());
    }
    ::which::which("cl.exe")
        .or_else(|_| ::which::which("cl"))
        .map_err(|_| ErrorKind::CompilerNotFound("cl.exe".to_string()).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use compiler::msvc::classify;

    #[test]
    fn test_preprocessor_switches_extracted_unrelativized() {
        let argv: Vec<String> = ["/c", "a.c", "/DFOO", "/IincDir", "/Foa.obj"].iter().map(|s| s.to_string()).collect();
        let parsed = match classify(&argv) {
            Classification::Cacheable(p) => p,
            _ => panic!("expected cacheable"),
        };
        let switches: Vec<String> = parsed
            .switches
            .iter()
            .filter(|s| s.class == SwitchClass::PreprocessorAffecting)
            .map(|s| normalize::render(s, &Relativizer::none()))
            .collect();
        assert_eq!(switches, vec!["/DFOO", "/IincDir"]);
    }

    fn base_config(dir: &Path) -> Config {
        Config {
            cache_dir: dir.to_path_buf(),
            real_compiler: None,
            disabled: false,
            hardlink: false,
            compress: false,
            compress_level: 6,
            force_indirect: false,
            base_dir: None,
            build_dir: None,
            lock_timeout_ms: 5000,
            hash_memoizer_enabled: false,
            memcached_addr: None,
            manifest_capacity: 10,
            default_max_cache_size: 1024 * 1024,
        }
    }

    /// A lock timeout bumps the dedicated counter before falling through to
    /// `passthrough`, even when the fallback invocation itself can't run
    /// (no real compiler available in this test environment).
    #[test]
    fn test_lock_timeout_bumps_counter_before_passthrough() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let config = base_config(dir.path());
        let cache = Cache::open(&config).unwrap();
        let argv: Vec<String> = vec!["/c".to_string(), "a.c".to_string()];
        let bogus_compiler = dir.path().join("no-such-cl.exe");

        let result: Result<Outcome> = Err(ErrorKind::LockTimeout("manifest".to_string()).into());
        let _ = handle_lock_timeout(result, &bogus_compiler, &argv, &cache);

        assert_eq!(cache.stats.read().unwrap().lock_timeouts, 1);
    }

    #[test]
    fn test_non_lock_timeout_error_passes_through_unchanged() {
        let dir = ::tempdir::TempDir::new("clcache-test").unwrap();
        let config = base_config(dir.path());
        let cache = Cache::open(&config).unwrap();
        let argv: Vec<String> = vec!["/c".to_string(), "a.c".to_string()];
        let bogus_compiler = dir.path().join("no-such-cl.exe");

        let result: Result<Outcome> = Err(ErrorKind::CacheCorruption("bad manifest".to_string()).into());
        let err = handle_lock_timeout(result, &bogus_compiler, &argv, &cache).unwrap_err();

        match *err.kind() {
            ErrorKind::CacheCorruption(_) => {}
            ref other => panic!("expected CacheCorruption, got {:?}", other),
        }
        assert_eq!(cache.stats.read().unwrap().lock_timeouts, 0);
    }
}
