// Copyright 2024 Kevin Ludwig
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

use core::{fmt, result};

use drv_isa::{CapacityExceeded, ResourceKind};

pub type Result<T> = result::Result<T, Error>;

/// Failures scoped to a single card, none of them ends an enumeration pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No card drove the bus during serial isolation.
    NoResponse,
    /// The isolated identity does not match its checksum.
    ChecksumMismatch { expected: u8, found: u8 },
    /// The card never flagged resource data as available.
    Timeout,
    CapacityExceeded(ResourceKind),
    Malformed(&'static str),
}

impl From<CapacityExceeded> for Error {
    fn from(value: CapacityExceeded) -> Self {
        Self::CapacityExceeded(value.0)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no card responded"),
            Self::ChecksumMismatch { expected, found } => write!(
                f,
                "serial checksum mismatch, expected {expected:#04x} found {found:#04x}"
            ),
            Self::Timeout => write!(f, "device failed to report resource data"),
            Self::CapacityExceeded(kind) => write!(f, "too many {kind}"),
            Self::Malformed(reason) => write!(f, "malformed resource data, {reason}"),
        }
    }
}
