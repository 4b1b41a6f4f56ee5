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

//! Simulated ISA bus with Plug and Play cards, for tests.

use std::collections::BTreeMap;

use drv_isa::{CardIdentity, Config, ConfigTarget, DeviceRegistry, Priority};

use crate::{
    isolation::{checksum, initiation_key},
    reg::{self, read_port_address, ConfigControl, PnpIo},
    resource::{large, small},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Address(u8),
    Data(u8),
    Read(u16, u8),
    Delay(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    WaitForKey,
    Sleep,
    Isolation,
    Config,
}

pub struct Card {
    pub vendor_id: u32,
    pub serial: u32,
    serial_data: [u8; 9],
    resources: Vec<u8>,
    stall_after: Option<usize>,

    pub state: State,
    pub csn: u8,
    ldn: u8,
    read_port: Option<u16>,
    key_position: usize,
    bit: usize,
    cursor: usize,
    /// Registers written per LDN while in Config state
    written: BTreeMap<(u8, u8), u8>,
}

impl Card {
    pub fn new(vendor_id: u32, serial: u32, resources: Vec<u8>) -> Self {
        let mut serial_data = [0; 9];
        serial_data[..4].copy_from_slice(&vendor_id.to_le_bytes());
        serial_data[4..8].copy_from_slice(&serial.to_le_bytes());
        serial_data[8] = checksum(vendor_id, serial);

        Self {
            vendor_id,
            serial,
            serial_data,
            resources,
            stall_after: None,
            state: State::WaitForKey,
            csn: 0,
            ldn: 0,
            read_port: None,
            key_position: 0,
            bit: 0,
            cursor: 0,
            written: BTreeMap::new(),
        }
    }

    pub fn with_checksum(mut self, checksum: u8) -> Self {
        self.serial_data[8] = checksum;
        self
    }

    /// Stops reporting resource data as available after `bytes` bytes.
    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    pub fn identity(&self) -> CardIdentity {
        CardIdentity {
            vendor_id: self.vendor_id,
            serial: self.serial,
            checksum: self.serial_data[8],
        }
    }

    pub fn written(&self, ldn: u8, register: u8) -> Option<u8> {
        self.written.get(&(ldn, register)).copied()
    }

    fn serial_bit(&self) -> Option<bool> {
        (self.bit < 72).then(|| self.serial_data[self.bit / 8] >> (self.bit % 8) & 1 != 0)
    }

    fn ready(&self) -> bool {
        self.cursor < self.resources.len() && self.stall_after.map_or(true, |n| self.cursor < n)
    }

    fn observe_key(&mut self, value: u8) {
        if self.state != State::WaitForKey {
            return;
        }

        let key = initiation_key();
        if value == key[self.key_position] {
            self.key_position += 1;
            if self.key_position == key.len() {
                self.key_position = 0;
                self.state = State::Sleep;
            }
        } else {
            self.key_position = (value == key[0]) as usize;
        }
    }
}

pub struct Bus {
    pub cards: Vec<Card>,
    pub log: Vec<Op>,
    /// Read ports another device decodes, the cards can't be heard there
    pub conflicting: Vec<u16>,
    address: u8,
    first_half: bool,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_cards(Vec::new())
    }

    pub fn with_cards(cards: Vec<Card>) -> Self {
        Self {
            cards,
            log: Vec::new(),
            conflicting: Vec::new(),
            address: 0,
            first_half: true,
        }
    }

    /// A bus whose only card already went through isolation and is in
    /// Config state with CSN 1.
    pub fn configured(mut card: Card, read_port: u8) -> Self {
        card.state = State::Config;
        card.csn = 1;
        card.read_port = Some(read_port_address(read_port));
        Self::with_cards(vec![card])
    }

    /// Register writes as (register, value) pairs.
    pub fn register_writes(&self) -> Vec<(u8, u8)> {
        let mut address = 0;
        let mut writes = Vec::new();
        for op in &self.log {
            match *op {
                Op::Address(value) => address = value,
                Op::Data(value) => writes.push((address, value)),
                _ => {}
            }
        }
        writes
    }

    fn listening(&mut self, port: u16, state: State) -> impl Iterator<Item = &mut Card> + '_ {
        let audible = !self.conflicting.contains(&port);
        self.cards
            .iter_mut()
            .filter(move |card| audible && card.state == state && card.read_port == Some(port))
    }

    fn isolation_read(&mut self, port: u16) -> u8 {
        let first_half = self.first_half;
        self.first_half = !first_half;

        let driving = self
            .listening(port, State::Isolation)
            .any(|card| card.serial_bit() == Some(true));
        if !first_half {
            // cards that saw someone else drive a 1 while sending a 0 lose
            for card in self.listening(port, State::Isolation) {
                if driving && card.serial_bit() == Some(false) {
                    card.state = State::Sleep;
                }
                card.bit += 1;
            }
        }

        match (driving, first_half) {
            (true, true) => 0x55,
            (true, false) => 0xAA,
            (false, _) => 0xFF,
        }
    }

    fn config_write(&mut self, register: u8, value: u8) {
        match register {
            reg::CONFIG_CONTROL => {
                let control = ConfigControl::from_bits_retain(value);
                for card in &mut self.cards {
                    if control.contains(ConfigControl::RESET_CSN) {
                        card.csn = 0;
                    }
                    if control.contains(ConfigControl::WAIT_FOR_KEY) {
                        card.state = State::WaitForKey;
                        card.key_position = 0;
                    }
                }
            }
            reg::WAKE => {
                for card in &mut self.cards {
                    match card.state {
                        State::WaitForKey => {}
                        State::Sleep if card.csn == value => {
                            card.state = if value == 0 {
                                State::Isolation
                            } else {
                                State::Config
                            };
                            card.bit = 0;
                            card.cursor = 0;
                        }
                        State::Isolation | State::Config => card.state = State::Sleep,
                        State::Sleep => {}
                    }
                }
                self.first_half = true;
            }
            reg::SET_RD_DATA => {
                for card in &mut self.cards {
                    if card.state == State::Isolation {
                        card.read_port = Some(read_port_address(value));
                    }
                }
            }
            reg::SET_CSN => {
                for card in &mut self.cards {
                    if card.state == State::Isolation {
                        card.csn = value;
                        card.state = State::Config;
                        card.cursor = 0;
                    }
                }
            }
            register => {
                for card in &mut self.cards {
                    if card.state == State::Config {
                        if register == reg::SET_LDN {
                            card.ldn = value;
                        } else {
                            card.written.insert((card.ldn, register), value);
                        }
                    }
                }
            }
        }
    }
}

impl PnpIo for Bus {
    fn write_address(&mut self, value: u8) {
        self.log.push(Op::Address(value));
        self.address = value;
        for card in &mut self.cards {
            card.observe_key(value);
        }

        if value == reg::SERIAL_ISOLATION {
            self.first_half = true;
            for card in &mut self.cards {
                if card.state == State::Isolation {
                    card.bit = 0;
                }
            }
        }
    }

    fn write_data(&mut self, value: u8) {
        self.log.push(Op::Data(value));
        self.config_write(self.address, value);
    }

    fn read_data(&mut self, read_port: u16) -> u8 {
        let value = match self.address {
            reg::SERIAL_ISOLATION => self.isolation_read(read_port),
            reg::STATUS => self
                .listening(read_port, State::Config)
                .next()
                .map_or(0, |card| card.ready() as u8),
            reg::RESOURCE_DATA => self
                .listening(read_port, State::Config)
                .next()
                .map_or(0xFF, |card| {
                    let byte = card.resources.get(card.cursor).copied().unwrap_or(0xFF);
                    card.cursor += 1;
                    byte
                }),
            _ => 0xFF,
        };
        self.log.push(Op::Read(read_port, value));
        value
    }

    fn delay_us(&mut self, us: u32) {
        self.log.push(Op::Delay(us));
    }
}

/// Builder for resource data.
pub struct Stream(Vec<u8>);

impl Stream {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn small(mut self, kind: u8, payload: &[u8]) -> Self {
        self.0.push(kind << 3 | payload.len() as u8);
        self.0.extend_from_slice(payload);
        self
    }

    pub fn large(mut self, kind: u8, payload: &[u8]) -> Self {
        self.0.push(0x80 | kind);
        self.0.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        self.0.extend_from_slice(payload);
        self
    }

    pub fn logical_device(self, id: u32) -> Self {
        let mut payload = id.to_le_bytes().to_vec();
        payload.push(0x00);
        self.small(small::LOGICAL_DEVICE, &payload)
    }

    pub fn compatible(self, id: u32) -> Self {
        self.small(small::COMPAT_DEVICE, &id.to_le_bytes())
    }

    pub fn irq(self, mask: u16) -> Self {
        self.small(small::IRQ_FORMAT, &mask.to_le_bytes())
    }

    pub fn dma(self, mask: u8) -> Self {
        self.small(small::DMA_FORMAT, &[mask, 0x00])
    }

    pub fn start_dependent(self, priority: Option<u8>) -> Self {
        match priority {
            Some(priority) => self.small(small::START_DEPENDENT, &[priority]),
            None => self.small(small::START_DEPENDENT, &[]),
        }
    }

    pub fn end_dependent(self) -> Self {
        self.small(small::END_DEPENDENT, &[])
    }

    pub fn io_range(self, min: u16, max: u16, align: u8, length: u8) -> Self {
        let [min_lo, min_hi] = min.to_le_bytes();
        let [max_lo, max_hi] = max.to_le_bytes();
        self.small(
            small::IO_RANGE,
            &[0x01, min_lo, min_hi, max_lo, max_hi, align, length],
        )
    }

    pub fn io_fixed(self, base: u16, length: u8) -> Self {
        let [base_lo, base_hi] = base.to_le_bytes();
        self.small(small::IO_FIXED, &[base_lo, base_hi, length])
    }

    pub fn ansi(self, text: &str) -> Self {
        self.large(large::ID_ANSI, text.as_bytes())
    }

    pub fn memory_range(self, info: u8, min: u16, max: u16, align: u16, length: u16) -> Self {
        let mut payload = vec![info];
        for field in [min, max, align, length] {
            payload.extend_from_slice(&field.to_le_bytes());
        }
        self.large(large::MEMORY_RANGE, &payload)
    }

    pub fn memory32_fixed(self, info: u8, base: u32, length: u32) -> Self {
        let mut payload = vec![info];
        payload.extend_from_slice(&base.to_le_bytes());
        payload.extend_from_slice(&length.to_le_bytes());
        self.large(large::MEMORY32_FIXED, &payload)
    }

    pub fn end(self) -> Vec<u8> {
        let mut stream = self.small(small::END, &[0]).0;
        // checksum byte of the end item makes the stream sum to zero
        let sum = stream[..stream.len() - 1]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if let Some(last) = stream.last_mut() {
            *last = sum.wrapping_neg();
        }
        stream
    }
}

pub struct Registered {
    pub identity: CardIdentity,
    pub csn: u8,
    pub ldn: u8,
    pub logical_id: u32,
    pub description: Option<String>,
    pub compatible_ids: Vec<u32>,
    pub configs: Vec<(Priority, Config)>,
    pub target: Option<ConfigTarget>,
}

#[derive(Default)]
pub struct RecordingRegistry {
    pub devices: Vec<Registered>,
}

impl DeviceRegistry for RecordingRegistry {
    type Handle = usize;

    fn register_logical_device(
        &mut self,
        identity: &CardIdentity,
        csn: u8,
        ldn: u8,
        logical_id: u32,
    ) -> usize {
        self.devices.push(Registered {
            identity: *identity,
            csn,
            ldn,
            logical_id,
            description: None,
            compatible_ids: Vec::new(),
            configs: Vec::new(),
            target: None,
        });
        self.devices.len() - 1
    }

    fn set_description(&mut self, handle: usize, description: &str) {
        self.devices[handle].description = Some(description.to_owned());
    }

    fn set_compatible_id(&mut self, handle: usize, id: u32) {
        self.devices[handle].compatible_ids.push(id);
    }

    fn add_candidate_configuration(&mut self, handle: usize, priority: Priority, config: Config) {
        self.devices[handle].configs.push((priority, config));
    }

    fn install_config_callback(&mut self, handle: usize, target: ConfigTarget) {
        self.devices[handle].target = Some(target);
    }
}
