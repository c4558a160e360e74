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

//! End-to-end checks of the maintenance subcommands against the built
//! `clcache` binary. None of these touch a real `cl.exe`, so they run
//! on any platform the binary builds for.

extern crate assert_cli;
extern crate tempdir;

#[test]
fn show_stats_on_a_fresh_cache_reports_zero_calls() {
    let dir = tempdir::TempDir::new("clcache-it").unwrap();
    assert_cli::Assert::main_binary()
        .with_args(&["-s"])
        .with_env(assert_cli::Environment::inherit().insert("CLCACHE_DIR", dir.path().to_str().unwrap()))
        .succeeds()
        .stdout()
        .contains("Total calls")
        .unwrap();
}

#[test]
fn zero_stats_reports_success() {
    let dir = tempdir::TempDir::new("clcache-it").unwrap();
    assert_cli::Assert::main_binary()
        .with_args(&["-z"])
        .with_env(assert_cli::Environment::inherit().insert("CLCACHE_DIR", dir.path().to_str().unwrap()))
        .succeeds()
        .stdout()
        .contains("statistics zeroed")
        .unwrap();
}

#[test]
fn clean_on_a_fresh_cache_reports_success() {
    let dir = tempdir::TempDir::new("clcache-it").unwrap();
    assert_cli::Assert::main_binary()
        .with_args(&["-c"])
        .with_env(assert_cli::Environment::inherit().insert("CLCACHE_DIR", dir.path().to_str().unwrap()))
        .succeeds()
        .stdout()
        .contains("evicted")
        .unwrap();
}

#[test]
fn clear_cache_reports_success() {
    let dir = tempdir::TempDir::new("clcache-it").unwrap();
    assert_cli::Assert::main_binary()
        .with_args(&["-C"])
        .with_env(assert_cli::Environment::inherit().insert("CLCACHE_DIR", dir.path().to_str().unwrap()))
        .succeeds()
        .stdout()
        .contains("cache cleared")
        .unwrap();
}

#[test]
fn set_max_size_accepts_suffixed_values() {
    let dir = tempdir::TempDir::new("clcache-it").unwrap();
    assert_cli::Assert::main_binary()
        .with_args(&["-M", "2G"])
        .with_env(assert_cli::Environment::inherit().insert("CLCACHE_DIR", dir.path().to_str().unwrap()))
        .succeeds()
        .stdout()
        .contains("2147483648 bytes")
        .unwrap();
}
