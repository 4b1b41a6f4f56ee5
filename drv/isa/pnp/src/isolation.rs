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

//! Initiation key and serial isolation, see "Plug and Play ISA
//! Specification" 1.0a, section 4.

use drv_isa::{CardIdentity, DeviceRegistry, EisaId};
use log::{debug, trace};

use crate::{
    error::{Error, Result},
    reg::{self, ConfigControl, PnpIo, Registers},
    resource, ScanOptions,
};

/// CSNs are handed out from 1, 0 means "not isolated yet".
pub const MAX_CARDS: u8 = 8;

const KEY_LENGTH: usize = 32;
const SERIAL_BITS: usize = 72;
const IDENTITY_BITS: usize = 64;

const ASSERTED: u8 = 0x55;
const DEASSERTED: u8 = 0xAA;

const BIT_DELAY_US: u32 = 250;
const ISOLATION_DELAY_US: u32 = 1000;

/// The 8-bit LFSR generating the initiation key and the serial checksum.
#[derive(Clone, Copy, Debug)]
pub struct Lfsr(u8);

impl Lfsr {
    pub const SEED: u8 = 0x6A;

    pub const fn new() -> Self {
        Self(Self::SEED)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn step(&mut self) {
        self.fold(false);
    }

    /// Shifts once, mixing `bit` into the feedback.
    pub fn fold(&mut self, bit: bool) {
        let feedback = (self.0 ^ self.0 >> 1 ^ bit as u8) & 1;
        self.0 = self.0 >> 1 | feedback << 7;
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new()
    }
}

pub fn initiation_key() -> [u8; KEY_LENGTH] {
    let mut key = [0; KEY_LENGTH];
    let mut lfsr = Lfsr::new();
    for byte in &mut key {
        *byte = lfsr.value();
        lfsr.step();
    }
    key
}

/// Moves every card in Wait for Key to Sleep, cards in other states ignore it.
pub fn send_initiation_key<IO: PnpIo>(regs: &mut Registers<IO>) {
    // the LFSR is reset by two consecutive writes of zero
    regs.select(0);
    regs.select(0);

    for byte in initiation_key() {
        regs.select(byte);
    }
}

/// Checksum a card appends to its 64 identity bits.
pub fn checksum(vendor_id: u32, serial: u32) -> u8 {
    let mut lfsr = Lfsr::new();
    for byte in vendor_id.to_le_bytes().into_iter().chain(serial.to_le_bytes()) {
        for bit in 0..8 {
            lfsr.fold(byte >> bit & 1 != 0);
        }
    }
    lfsr.value()
}

fn read_serial<IO: PnpIo>(regs: &mut Registers<IO>) -> Result<CardIdentity> {
    let mut data = [0u8; SERIAL_BITS / 8];
    let mut lfsr = Lfsr::new();
    let mut present = false;

    regs.select(reg::SERIAL_ISOLATION);
    for i in 0..SERIAL_BITS {
        // both reads are always done, the card expects the pair
        let first = regs.read_data() == ASSERTED;
        regs.delay_us(BIT_DELAY_US);
        let second = regs.read_data() == DEASSERTED;
        regs.delay_us(BIT_DELAY_US);

        let bit = first && second;
        present |= bit;
        if i < IDENTITY_BITS {
            lfsr.fold(bit);
        }
        data[i / 8] = data[i / 8] >> 1 | (bit as u8) << 7;
    }

    if !present {
        return Err(Error::NoResponse);
    }
    if data[8] != lfsr.value() {
        return Err(Error::ChecksumMismatch {
            expected: lfsr.value(),
            found: data[8],
        });
    }

    Ok(CardIdentity {
        vendor_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        serial: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        checksum: data[8],
    })
}

/// Reads the identity of the card winning arbitration. The losers drop back
/// to Sleep, the winner stays in Isolation.
pub fn isolate_one_card<IO: PnpIo>(regs: &mut Registers<IO>) -> Option<CardIdentity> {
    match read_serial(regs) {
        Ok(identity) => Some(identity),
        Err(error) => {
            trace!("Isolation on {:#x} ended: {}", regs.read_port(), error);
            None
        }
    }
}

/// Assigns a CSN to every card that answers on `read_port` and scans its
/// resources, returns the number of cards found.
pub fn run_isolation_pass<IO: PnpIo, R: DeviceRegistry>(
    regs: &mut Registers<IO>,
    registry: &mut R,
    options: &ScanOptions,
    read_port: u8,
) -> usize {
    let mut found = 0;

    send_initiation_key(regs);
    regs.write(reg::CONFIG_CONTROL, ConfigControl::RESET_CSN.bits());
    regs.write(reg::WAKE, 0);
    regs.write(reg::SET_RD_DATA, read_port);
    regs.set_read_port(read_port);

    for csn in 1..MAX_CARDS {
        regs.select(reg::SERIAL_ISOLATION);
        regs.delay_us(ISOLATION_DELAY_US);

        let Some(identity) = isolate_one_card(regs) else {
            break;
        };
        debug!("CSN {} is {}", csn, identity);

        regs.write(reg::SET_CSN, csn);
        let outcome = resource::scan_descriptors(regs, registry, options, &identity, csn);
        for device in &outcome.devices {
            debug!(
                "CSN {} LDN {} is {} with {} alternative(s)",
                csn,
                device.ldn,
                EisaId(device.logical_id),
                device.alternatives.len()
            );
        }
        found += 1;

        // the configured card goes to Sleep, the rest back to Isolation
        regs.write(reg::WAKE, 0);
    }

    regs.write(reg::CONFIG_CONTROL, ConfigControl::WAIT_FOR_KEY.bits());

    found
}
