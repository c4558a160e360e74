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

//! Argument model & classifier (spec component A) and command-line
//! normalizer (component B), specialized to the MSVC `cl.exe` command line.

pub mod msvc;

use std::path::PathBuf;

/// Why an invocation was not handed to the cache pipeline at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughReason {
    Linking,
    NoSourceFile,
    ExternalDebugInfo,
    PreprocessorOnly,
    Disabled,
    Unsupported(String),
}

impl PassthroughReason {
    /// The `Statistics` counter this reason bumps, per spec.md §3's named
    /// counter set. `Disabled`/`Unsupported` have no counter of their own
    /// there; they still count toward `CallsTotal`.
    pub fn stat_name(&self) -> Option<&'static str> {
        match *self {
            PassthroughReason::Linking => Some("CallsForLinking"),
            PassthroughReason::NoSourceFile => Some("CallsWithoutSourceFile"),
            PassthroughReason::ExternalDebugInfo => Some("CallsForExternalDebugInfo"),
            PassthroughReason::PreprocessorOnly => Some("CallsForPreprocessing"),
            PassthroughReason::Disabled | PassthroughReason::Unsupported(_) => None,
        }
    }
}

/// The result of classifying one invocation's command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A single cacheable source compile.
    Cacheable(msvc::ParsedArguments),
    /// Multiple source files were given; split into one invocation per
    /// source, preserving duplicates.
    SplitMulti(Vec<Vec<String>>),
    /// Not cacheable; forward to the real compiler and record why.
    Passthrough(PassthroughReason),
}

/// Switch classification per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchClass {
    PreprocessorAffecting,
    CodeGenAffecting,
    OutputLocation,
    Informational,
    Unrecognized,
}

/// One parsed switch, retaining its original textual form(s) so the
/// normalizer can re-emit values verbatim and in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    /// Bare switch name, e.g. `"Fo"`, `"D"`, `"O2"` (for flag-only switches
    /// the name is the whole switch body).
    pub name: String,
    /// The value, if any (joined or from the following token).
    pub value: Option<String>,
    pub class: SwitchClass,
    /// `true` if switch and value were written as one token (`/Fofoo.obj`)
    /// as opposed to two (`/Fo foo.obj`).
    pub joined: bool,
}

impl Switch {
    pub fn path_value(&self) -> Option<PathBuf> {
        self.value.as_ref().map(PathBuf::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_disabled_and_unsupported_have_no_dedicated_counter() {
        assert_eq!(PassthroughReason::Disabled.stat_name(), None);
        assert_eq!(PassthroughReason::Unsupported("/Yc".to_string()).stat_name(), None);
        assert_eq!(PassthroughReason::Linking.stat_name(), Some("CallsForLinking"));
    }
}
