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

//! `clcache`: a compiler cache for the MSVC `cl.exe` command-line
//! compiler. Invoked as a drop-in replacement for `cl.exe` (point
//! `CLCACHE_CL` or your build's compiler override at this binary).

extern crate byteorder;
extern crate clap;
extern crate directories;
extern crate env_logger;
#[macro_use]
extern crate error_chain;
extern crate filetime;
extern crate flate2;
extern crate fs2;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate ring;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate tempdir;
extern crate tempfile;
extern crate which;

mod cache;
mod cli;
mod compiler;
mod compress;
mod config;
mod driver;
mod errors;
mod includes;
mod lock;
mod manifest;
mod normalize;
mod objectstore;
mod relativize;
mod respfile;
mod stats;
mod util;

use std::env;
use std::process;

use cache::Cache;
use cli::Command;
use config::Config;
use errors::*;

fn main() {
    if let Some(level) = config::log_level() {
        env::set_var("RUST_LOG", format!("clcache={}", level));
    }
    env_logger::init().ok();

    let argv: Vec<String> = env::args().skip(1).collect();
    match run(&argv) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("clcache: fatal: {}", e);
            let code = match *e.kind() {
                ErrorKind::CompilerNotFound(_) => EXIT_COMPILER_NOT_FOUND,
                ErrorKind::ConfigMismatch(_) => EXIT_CONFIG_MISMATCH,
                _ => 1,
            };
            process::exit(code);
        }
    }
}

fn run(argv: &[String]) -> Result<i32> {
    let config = Config::from_env()?;
    let cache = Cache::open(&config)?;

    match cli::parse(argv)? {
        Command::ShowStats => {
            print!("{}", cli::show_stats(&cache)?);
            Ok(0)
        }
        Command::Clean => {
            let report = cache.clean()?;
            println!("evicted {} entries", report.removed);
            Ok(0)
        }
        Command::ClearCache => {
            cache.clear()?;
            println!("cache cleared");
            Ok(0)
        }
        Command::ZeroStats => {
            cache.stats.zero()?;
            println!("statistics zeroed");
            Ok(0)
        }
        Command::SetMaxSize(bytes) => {
            cache.stats.set_max_cache_size(bytes)?;
            println!("set maximum cache size to {} bytes", bytes);
            Ok(0)
        }
        Command::Invoke(invoke_argv) => {
            let outcome = driver::run(&invoke_argv, &config, &cache)?;
            Ok(outcome.exit_code)
        }
    }
}
