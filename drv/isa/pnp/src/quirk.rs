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

use drv_isa::EisaId;
use log::debug;

use crate::reg::{self, PnpIo, Registers};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuirkAction {
    WriteRegister { register: u8, value: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuirkRule {
    pub vendor_id: u32,
    /// 0 matches every logical device of the vendor
    pub logical_id: u32,
    pub action: QuirkAction,
}

impl QuirkRule {
    pub const fn matches(&self, vendor_id: u32, logical_id: u32) -> bool {
        self.vendor_id == vendor_id && (self.logical_id == 0 || self.logical_id == logical_id)
    }
}

pub static QUIRKS: &[QuirkRule] = &[
    // Gravis UltraSound only powers up once 0xF2 is set
    QuirkRule {
        vendor_id: 0x0100561E, // GRV0001
        logical_id: 0,
        action: QuirkAction::WriteRegister {
            register: 0xF2,
            value: 0xFF,
        },
    },
];

pub fn matching<'a>(
    table: &'a [QuirkRule],
    vendor_id: u32,
    logical_id: u32,
) -> impl Iterator<Item = &'a QuirkRule> {
    table
        .iter()
        .filter(move |rule| rule.matches(vendor_id, logical_id))
}

/// Applies every matching rule in table order. The card has to be in Config
/// state.
pub fn apply<IO: PnpIo>(
    regs: &mut Registers<IO>,
    table: &[QuirkRule],
    vendor_id: u32,
    logical_id: u32,
    ldn: u8,
) {
    for rule in matching(table, vendor_id, logical_id) {
        debug!("Applying quirk to {} LDN {}", EisaId(logical_id), ldn);
        match rule.action {
            QuirkAction::WriteRegister { register, value } => {
                regs.write(reg::SET_LDN, ldn);
                regs.write(register, value);
            }
        }
    }
}
