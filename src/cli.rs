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

//! Maintenance subcommands (`-s`, `-c`, `-C`, `-z`, `-M`). Anything that
//! isn't one of these is a compiler invocation and is handed to
//! `driver::run` unparsed, since `cl.exe`'s own switch grammar can't be
//! made to coexist with a general-purpose argument parser.

use cache::Cache;
use errors::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowStats,
    Clean,
    ClearCache,
    ZeroStats,
    SetMaxSize(u64),
    Invoke(Vec<String>),
}

/// Recognize a maintenance subcommand among `argv` (the process's own
/// arguments, not the wrapped compiler's). Anything unrecognized falls
/// through to `Command::Invoke`.
pub fn parse(argv: &[String]) -> Result<Command> {
    match argv.first().map(|s| s.as_str()) {
        Some("-s") | Some("--show-stats") => Ok(Command::ShowStats),
        Some("-c") | Some("--clean") => Ok(Command::Clean),
        Some("-C") | Some("--clear") => Ok(Command::ClearCache),
        Some("-z") | Some("--zero-stats") => Ok(Command::ZeroStats),
        Some("-M") | Some("--max-size") => {
            let value = argv.get(1).ok_or_else(|| Error::from("-M requires a size argument"))?;
            Ok(Command::SetMaxSize(parse_size(value)?))
        }
        _ => Ok(Command::Invoke(argv.to_vec())),
    }
}

/// Parse a size like `5G`, `512M`, `1024` (bytes, no suffix) per
/// spec.md §7.
fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let (digits, multiplier) = if let Some(stripped) = strip_suffix(value, 'G') {
        (stripped, 1024 * 1024 * 1024)
    } else if let Some(stripped) = strip_suffix(value, 'M') {
        (stripped, 1024 * 1024)
    } else if let Some(stripped) = strip_suffix(value, 'K') {
        (stripped, 1024)
    } else {
        (value, 1)
    };
    let n: u64 = digits.parse().chain_err(|| format!("invalid cache size: {}", value))?;
    Ok(n * multiplier)
}

fn strip_suffix(value: &str, suffix: char) -> Option<&str> {
    if value.ends_with(suffix) || value.ends_with(suffix.to_ascii_lowercase()) {
        Some(&value[..value.len() - 1])
    } else {
        None
    }
}

pub fn show_stats(cache: &Cache) -> Result<String> {
    let stats = cache.stats.read()?;
    Ok(format!(
        "Total calls                   {}\n\
         Calls for linking              {}\n\
         Calls for preprocessing        {}\n\
         Calls without source file      {}\n\
         Calls with multiple sources    {}\n\
         Calls for external debug info  {}\n\
         Cache hits                     {}\n\
         Cache misses                   {}\n\
         Evicted misses                 {}\n\
         Header-changed misses          {}\n\
         Source-changed misses          {}\n\
         Lock timeouts                  {}\n\
         Cache entries                  {}\n\
         Cache size                     {} bytes\n\
         Max cache size                 {} bytes\n",
        stats.calls_total,
        stats.calls_for_linking,
        stats.calls_for_preprocessing,
        stats.calls_without_source_file,
        stats.calls_for_multiple_sources,
        stats.calls_for_external_debug_info,
        stats.cache_hits,
        stats.cache_misses,
        stats.evicted_misses,
        stats.header_changed_misses,
        stats.source_changed_misses,
        stats.lock_timeouts,
        stats.cache_entries,
        stats.cache_size,
        stats.max_cache_size,
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_show_stats() {
        assert_eq!(parse(&["-s".to_string()]).unwrap(), Command::ShowStats);
    }

    #[test]
    fn test_parse_max_size_with_suffix() {
        assert_eq!(parse(&["-M".to_string(), "5G".to_string()]).unwrap(), Command::SetMaxSize(5 * 1024 * 1024 * 1024));
        assert_eq!(parse(&["-M".to_string(), "512M".to_string()]).unwrap(), Command::SetMaxSize(512 * 1024 * 1024));
    }

    #[test]
    fn test_parse_clean() {
        assert_eq!(parse(&["-c".to_string()]).unwrap(), Command::Clean);
    }

    #[test]
    fn test_parse_invoke_passthrough() {
        match parse(&["/c".to_string(), "a.c".to_string()]).unwrap() {
            Command::Invoke(argv) => assert_eq!(argv, vec!["/c".to_string(), "a.c".to_string()]),
            other => panic!("expected Invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_size_bare_bytes() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
    }
}
