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

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::ops::Range;

use drv_isa::DeviceRegistry;
use log::{debug, info};

use crate::{
    quirk::{QuirkRule, QUIRKS},
    reg::{PnpIo, Registers},
};

pub mod config;
pub mod error;
pub mod isolation;
pub mod quirk;
pub mod reg;
pub mod resource;
#[cfg(test)]
mod sim;

/// Knobs for [`identify`].
#[derive(Clone, Debug)]
pub struct ScanOptions<'a> {
    /// Raw read port values to try, the port used is `(raw << 2) | 3`
    pub read_ports: Range<u8>,
    pub read_port_step: usize,
    pub quirks: &'a [QuirkRule],
    /// Resource items read per card before the stream is given up on
    pub max_tags: usize,
}

impl Default for ScanOptions<'static> {
    fn default() -> Self {
        Self {
            read_ports: 0x80..0xFF,
            read_port_step: 0x10,
            quirks: QUIRKS,
            max_tags: 1024,
        }
    }
}

/// Enumerates every Plug and Play card on the bus.
///
/// The candidate read ports are tried in order until one of them finds a
/// card, a port decoded by some other device just reads back nothing.
/// Returns the number of cards found.
pub fn identify<IO: PnpIo, R: DeviceRegistry>(
    regs: &mut Registers<IO>,
    registry: &mut R,
    options: &ScanOptions,
) -> usize {
    for read_port in options
        .read_ports
        .clone()
        .step_by(options.read_port_step.max(1))
    {
        debug!("Trying read port at {:#x}", reg::read_port_address(read_port));
        let found = isolation::run_isolation_pass(regs, registry, options, read_port);
        if found != 0 {
            info!(
                "Found {} card(s) using read port {:#x}",
                found,
                regs.read_port()
            );
            return found;
        }
    }

    0
}
