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

//! Resource data of an isolated card.
//!
//! The stream is a sequence of items, each introduced by a tag byte:
//!
//! | form  | bit 7 | item     | length                          |
//! |-------|-------|----------|---------------------------------|
//! | small | 0     | bits 6-3 | bits 2-0                        |
//! | large | 1     | bits 6-0 | next two bytes, little-endian   |

use alloc::{string::String, vec::Vec};
use core::mem;

use drv_isa::{
    CardIdentity, Config, ConfigTarget, DeviceRegistry, MemoryFlags, MemoryRange,
    Priority, ResourceRange,
};
use log::{trace, warn};

use crate::{
    error::{Error, Result},
    quirk,
    reg::{PnpIo, Registers},
    ScanOptions,
};

pub mod small {
    pub const VERSION: u8 = 0x1;
    pub const LOGICAL_DEVICE: u8 = 0x2;
    pub const COMPAT_DEVICE: u8 = 0x3;
    pub const IRQ_FORMAT: u8 = 0x4;
    pub const DMA_FORMAT: u8 = 0x5;
    pub const START_DEPENDENT: u8 = 0x6;
    pub const END_DEPENDENT: u8 = 0x7;
    pub const IO_RANGE: u8 = 0x8;
    pub const IO_FIXED: u8 = 0x9;
    pub const VENDOR: u8 = 0xE;
    pub const END: u8 = 0xF;
}

pub mod large {
    pub const MEMORY_RANGE: u8 = 0x1;
    pub const ID_ANSI: u8 = 0x2;
    pub const ID_UNICODE: u8 = 0x3;
    pub const VENDOR: u8 = 0x4;
    pub const MEMORY32_RANGE: u8 = 0x5;
    pub const MEMORY32_FIXED: u8 = 0x6;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Small { kind: u8, length: usize },
    Large { kind: u8 },
}

impl Tag {
    pub const fn decode(tag: u8) -> Self {
        if tag & 0x80 == 0 {
            Self::Small {
                kind: tag >> 3 & 0xF,
                length: (tag & 0x7) as usize,
            }
        } else {
            Self::Large { kind: tag & 0x7F }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalDevice {
    pub ldn: u8,
    pub vendor_id: u32,
    pub serial: u32,
    pub logical_id: u32,
    pub compatible_ids: Vec<u32>,
    pub description: Option<String>,
    /// Resources the device always needs
    pub base: Config,
    /// Mutually exclusive ways to satisfy the rest, each seeded from `base`
    pub alternatives: Vec<(Priority, Config)>,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub devices: Vec<LogicalDevice>,
    /// Why the stream was not read up to its end tag
    pub aborted: Option<Error>,
}

/// Where resource items currently accumulate.
enum Cursor {
    /// Before the first logical device, inherited by every device
    Card,
    Base,
    Alternative(Priority, Config),
}

enum Flow {
    Continue,
    End,
}

struct Scan<'a, IO, R> {
    regs: &'a mut Registers<IO>,
    registry: &'a mut R,
    options: &'a ScanOptions<'a>,
    identity: &'a CardIdentity,
    csn: u8,
    card: Config,
    devices: Vec<LogicalDevice>,
    cursor: Cursor,
    description: Option<String>,
}

/// Reads the resource data of the card in Config state and hands every
/// logical device found to `registry`.
///
/// Errors only end this card's scan, devices completed until then are kept.
pub fn scan_descriptors<IO: PnpIo, R: DeviceRegistry>(
    regs: &mut Registers<IO>,
    registry: &mut R,
    options: &ScanOptions,
    identity: &CardIdentity,
    csn: u8,
) -> ScanOutcome {
    let mut scan = Scan {
        regs,
        registry,
        options,
        identity,
        csn,
        card: Config::default(),
        devices: Vec::new(),
        cursor: Cursor::Card,
        description: None,
    };

    let aborted = scan.run().err();
    if let Some(error) = aborted {
        warn!("CSN {} {}", csn, error);
    }
    scan.close_device();

    ScanOutcome {
        devices: scan.devices,
        aborted,
    }
}

impl<IO: PnpIo, R: DeviceRegistry> Scan<'_, IO, R> {
    fn run(&mut self) -> Result<()> {
        for _ in 0..self.options.max_tags {
            let mut tag = [0];
            self.regs.read_resource(&mut tag)?;

            let flow = match Tag::decode(tag[0]) {
                Tag::Small { kind, length } => {
                    let mut payload = [0; 7];
                    self.regs.read_resource(&mut payload[..length])?;
                    self.small(kind, &payload[..length])?
                }
                Tag::Large { kind } => {
                    let mut length = [0; 2];
                    self.regs.read_resource(&mut length)?;
                    self.large(kind, u16::from_le_bytes(length) as usize)?;
                    Flow::Continue
                }
            };
            if let Flow::End = flow {
                return Ok(());
            }
        }

        Err(Error::Malformed("no end tag"))
    }

    fn small(&mut self, kind: u8, payload: &[u8]) -> Result<Flow> {
        match kind {
            small::LOGICAL_DEVICE => {
                self.logical_device(u32::from_le_bytes(field(payload)?))?;
            }
            small::COMPAT_DEVICE => {
                let id = u32::from_le_bytes(field(payload)?);
                if let Some(device) = self.devices.last_mut() {
                    device.compatible_ids.push(id);
                }
            }
            small::IRQ_FORMAT => {
                let mask = u16::from_le_bytes(field(payload)?);
                self.config().push_irq(mask)?;
            }
            small::DMA_FORMAT => {
                let [mask] = field::<1>(payload)?;
                self.config().push_drq(mask)?;
            }
            small::START_DEPENDENT => self.start_dependent(payload.first().copied())?,
            small::END_DEPENDENT => self.end_dependent(),
            small::IO_RANGE => {
                let [_, min_lo, min_hi, max_lo, max_hi, align, length] = field::<7>(payload)?;
                let max = u16::from_le_bytes([max_lo, max_hi]) as u32;
                self.config().push_port(ResourceRange {
                    start: u16::from_le_bytes([min_lo, min_hi]) as u32,
                    end: (max + length as u32).saturating_sub(1),
                    size: length as u32,
                    align: align as u32,
                })?;
            }
            small::IO_FIXED => {
                let [base_lo, base_hi, length] = field::<3>(payload)?;
                let base = u16::from_le_bytes([base_lo, base_hi]) as u32;
                self.config().push_port(ResourceRange {
                    start: base,
                    end: (base + length as u32).saturating_sub(1),
                    size: length as u32,
                    align: 1,
                })?;
            }
            small::END => return Ok(Flow::End),
            kind => trace!("CSN {} skipping small item {:#x}", self.csn, kind),
        }

        Ok(Flow::Continue)
    }

    fn large(&mut self, kind: u8, length: usize) -> Result<()> {
        match kind {
            large::ID_ANSI => self.identifier_string(length)?,
            large::MEMORY_RANGE => {
                let [info, min_lo, min_hi, max_lo, max_hi, align_lo, align_hi, length_lo, length_hi] =
                    self.payload::<9>(length)?;
                // zero alignment stands for 64 KiB
                let align = match u16::from_le_bytes([align_lo, align_hi]) {
                    0 => 0x10000,
                    align => align as u32,
                };
                self.config().push_memory(MemoryRange {
                    range: ResourceRange {
                        start: upper_24(min_lo, min_hi),
                        end: upper_24(max_lo, max_hi),
                        size: upper_24(length_lo, length_hi),
                        align,
                    },
                    flags: MemoryFlags::from_bits_retain(info),
                })?;
            }
            large::MEMORY32_RANGE | large::MEMORY32_FIXED => {
                // the writer only drives the 24-bit memory descriptors
                trace!("CSN {} skipping 32-bit memory item", self.csn);
                self.regs.skip_resource(length)?;
            }
            kind => {
                trace!("CSN {} skipping large item {:#x}", self.csn, kind);
                self.regs.skip_resource(length)?;
            }
        }

        Ok(())
    }

    fn logical_device(&mut self, logical_id: u32) -> Result<()> {
        let ldn = match self.devices.last() {
            Some(device) => device
                .ldn
                .checked_add(1)
                .ok_or(Error::Malformed("too many logical devices"))?,
            None => 0,
        };
        self.close_device();

        quirk::apply(
            self.regs,
            self.options.quirks,
            self.identity.vendor_id,
            logical_id,
            ldn,
        );

        self.devices.push(LogicalDevice {
            ldn,
            vendor_id: self.identity.vendor_id,
            serial: self.identity.serial,
            logical_id,
            compatible_ids: Vec::new(),
            description: self.description.clone(),
            base: self.card.clone(),
            alternatives: Vec::new(),
        });
        self.cursor = Cursor::Base;

        Ok(())
    }

    fn start_dependent(&mut self, priority: Option<u8>) -> Result<()> {
        if let Cursor::Alternative(..) = self.cursor {
            self.end_dependent();
        }
        let Some(device) = self.devices.last() else {
            return Err(Error::Malformed("dependent function outside a logical device"));
        };

        let priority = priority.map_or(Priority::Acceptable, Priority::from);
        self.cursor = Cursor::Alternative(priority, device.base.clone());

        Ok(())
    }

    fn end_dependent(&mut self) {
        match mem::replace(&mut self.cursor, Cursor::Base) {
            Cursor::Alternative(priority, config) => {
                if let Some(device) = self.devices.last_mut() {
                    device.alternatives.push((priority, config));
                }
            }
            Cursor::Base => trace!("CSN {} end of dependent functions without start", self.csn),
            Cursor::Card => self.cursor = Cursor::Card,
        }
    }

    fn config(&mut self) -> &mut Config {
        match &mut self.cursor {
            Cursor::Alternative(_, config) => config,
            Cursor::Base => match self.devices.last_mut() {
                Some(device) => &mut device.base,
                None => &mut self.card,
            },
            Cursor::Card => &mut self.card,
        }
    }

    fn identifier_string(&mut self, length: usize) -> Result<()> {
        let mut text: Vec<u8> = Vec::new();
        if text.try_reserve_exact(length).is_err() {
            warn!("CSN {} out of memory for identifier string", self.csn);
            return self.regs.skip_resource(length);
        }
        text.resize(length, 0);
        self.regs.read_resource(&mut text)?;

        while text.last() == Some(&b' ') {
            text.pop();
        }
        let description = String::from_utf8_lossy(&text).into_owned();
        if let Some(device) = self.devices.last_mut() {
            device.description = Some(description.clone());
        }
        self.description = Some(description);

        Ok(())
    }

    /// Reads the first `N` bytes of a large item and discards the rest.
    fn payload<const N: usize>(&mut self, length: usize) -> Result<[u8; N]> {
        if length < N {
            self.regs.skip_resource(length)?;
            return Err(Error::Malformed("short large item"));
        }

        let mut payload = [0; N];
        self.regs.read_resource(&mut payload)?;
        self.regs.skip_resource(length - N)?;
        Ok(payload)
    }

    /// Publishes the device under construction, committing an alternative the
    /// stream left open.
    fn close_device(&mut self) {
        if let Cursor::Alternative(..) = self.cursor {
            self.end_dependent();
        }
        if let Some(device) = self.devices.last() {
            publish(self.registry, self.identity, self.csn, device);
        }
    }
}

fn publish<R: DeviceRegistry>(
    registry: &mut R,
    identity: &CardIdentity,
    csn: u8,
    device: &LogicalDevice,
) {
    let handle = registry.register_logical_device(identity, csn, device.ldn, device.logical_id);
    if let Some(description) = &device.description {
        registry.set_description(handle, description);
    }
    for &id in &device.compatible_ids {
        registry.set_compatible_id(handle, id);
    }

    if device.alternatives.is_empty() {
        registry.add_candidate_configuration(handle, Priority::Acceptable, device.base.clone());
    }
    for (priority, config) in &device.alternatives {
        registry.add_candidate_configuration(handle, *priority, config.clone());
    }

    registry.install_config_callback(
        handle,
        ConfigTarget {
            csn,
            ldn: device.ldn,
        },
    );
}

fn field<const N: usize>(payload: &[u8]) -> Result<[u8; N]> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::Malformed("short small item"))
}

/// Memory descriptors hold bits 8 to 23 of an address.
fn upper_24(low: u8, high: u8) -> u32 {
    (u16::from_le_bytes([low, high]) as u32) << 8
}
