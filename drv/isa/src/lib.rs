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

use core::fmt;

use arrayvec::ArrayVec;
use bitflags::bitflags;

/// Port ranges a single logical device can decode.
pub const ISA_NPORT: usize = 8;
/// Memory windows a single logical device can decode.
pub const ISA_NMEM: usize = 4;
/// Interrupt lines a single logical device can raise.
pub const ISA_NIRQ: usize = 2;
/// DMA channels a single logical device can drive.
pub const ISA_NDRQ: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceRange {
    /// Lowest acceptable base
    pub start: u32,
    /// Highest address the window may reach
    pub end: u32,
    pub size: u32,
    /// Base granularity, 1 means any base in range
    pub align: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    pub range: ResourceRange,
    pub flags: MemoryFlags,
}

bitflags! {
    /// Information byte of a memory range descriptor.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MemoryFlags: u8 {
        /// Writable
        const WRITABLE = 1 << 0;
        /// Read Cacheable
        const CACHEABLE = 1 << 1;
        /// Decodes the Upper Limit instead of the Range Length
        const HIGH_ADDRESS = 1 << 2;
        /// 16-bit Memory
        const WIDTH_16 = 1 << 3;
        /// 8-bit and 16-bit Memory
        const WIDTH_8_16 = 1 << 4;
        /// Shadowable
        const SHADOWABLE = 1 << 5;
        /// Expansion ROM
        const EXPANSION_ROM = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Port,
    Memory,
    Irq,
    Drq,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Port => "ports",
            Self::Memory => "memory ranges",
            Self::Irq => "irqs",
            Self::Drq => "drqs",
        })
    }
}

/// A resource list did not have room for another entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityExceeded(pub ResourceKind);

/// One set of resources a logical device decodes.
///
/// While discovering a device the entries are the acceptable ranges and masks
/// it declares. When handed to a [`ConfigWriter`] they are the allocator's
/// choice: `start` is the assigned base and each mask has a single bit set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub ports: ArrayVec<ResourceRange, ISA_NPORT>,
    pub memory: ArrayVec<MemoryRange, ISA_NMEM>,
    pub irqs: ArrayVec<u16, ISA_NIRQ>,
    pub drqs: ArrayVec<u8, ISA_NDRQ>,
}

impl Config {
    pub fn push_port(&mut self, range: ResourceRange) -> Result<(), CapacityExceeded> {
        self.ports
            .try_push(range)
            .map_err(|_| CapacityExceeded(ResourceKind::Port))
    }

    pub fn push_memory(&mut self, range: MemoryRange) -> Result<(), CapacityExceeded> {
        self.memory
            .try_push(range)
            .map_err(|_| CapacityExceeded(ResourceKind::Memory))
    }

    pub fn push_irq(&mut self, mask: u16) -> Result<(), CapacityExceeded> {
        self.irqs
            .try_push(mask)
            .map_err(|_| CapacityExceeded(ResourceKind::Irq))
    }

    pub fn push_drq(&mut self, mask: u8) -> Result<(), CapacityExceeded> {
        self.drqs
            .try_push(mask)
            .map_err(|_| CapacityExceeded(ResourceKind::Drq))
    }
}

/// Preference of an alternative configuration, lower is better.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priority {
    Preferred,
    #[default]
    Acceptable,
    SubOptimal,
    Reserved(u8),
}

impl Priority {
    pub const fn raw(self) -> u8 {
        match self {
            Self::Preferred => 0,
            Self::Acceptable => 1,
            Self::SubOptimal => 2,
            Self::Reserved(value) => value,
        }
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Preferred,
            1 => Self::Acceptable,
            2 => Self::SubOptimal,
            value => Self::Reserved(value),
        }
    }
}

/// Compressed EISA identifier, three letters and four hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EisaId(pub u32);

impl fmt::Display for EisaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [b0, b1, b2, b3] = self.0.to_le_bytes();
        let letter = |value: u8| char::from(b'@' + (value & 0x1F));
        write!(
            f,
            "{}{}{}{:02X}{:02X}",
            letter(b0 >> 2),
            letter((b0 & 0x3) << 3 | b1 >> 5),
            letter(b1),
            b2,
            b3
        )
    }
}

/// Hardware identity a Plug and Play card reports during isolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardIdentity {
    pub vendor_id: u32,
    pub serial: u32,
    pub checksum: u8,
}

impl fmt::Display for CardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} serial {:08x}", EisaId(self.vendor_id), self.serial)
    }
}

/// Addresses one logical device for reprogramming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigTarget {
    pub csn: u8,
    pub ldn: u8,
}

/// Owner of the device tree Plug and Play devices are attached to.
pub trait DeviceRegistry {
    type Handle: Copy;

    fn register_logical_device(
        &mut self,
        identity: &CardIdentity,
        csn: u8,
        ldn: u8,
        logical_id: u32,
    ) -> Self::Handle;

    fn set_description(&mut self, handle: Self::Handle, description: &str);

    fn set_compatible_id(&mut self, handle: Self::Handle, id: u32);

    fn add_candidate_configuration(&mut self, handle: Self::Handle, priority: Priority, config: Config);

    /// Remembers which logical device the allocator's choice has to be
    /// written to once resources are assigned.
    fn install_config_callback(&mut self, handle: Self::Handle, target: ConfigTarget);
}

/// Programs an allocator's choice into a device.
pub trait ConfigWriter {
    fn apply_configuration(&self, target: ConfigTarget, config: &Config, enable: bool);
}
