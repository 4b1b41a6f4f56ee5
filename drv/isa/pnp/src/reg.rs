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

use bitflags::bitflags;
use pio::{Port, ReadOnly, WriteOnly};

use crate::error::{Error, Result};

pub const ADDRESS: u16 = 0x279;
pub const WRITE_DATA: u16 = 0xA79;

pub const SET_RD_DATA: u8 = 0x00;
pub const SERIAL_ISOLATION: u8 = 0x01;
pub const CONFIG_CONTROL: u8 = 0x02;
pub const WAKE: u8 = 0x03;
pub const RESOURCE_DATA: u8 = 0x04;
pub const STATUS: u8 = 0x05;
pub const SET_CSN: u8 = 0x06;
pub const SET_LDN: u8 = 0x07;
pub const ACTIVATE: u8 = 0x30;
pub const IO_RANGE_CHECK: u8 = 0x31;

pub const fn mem_base_high(index: usize) -> u8 {
    0x40 + 8 * index as u8
}

pub const fn mem_base_low(index: usize) -> u8 {
    0x41 + 8 * index as u8
}

pub const fn mem_control(index: usize) -> u8 {
    0x42 + 8 * index as u8
}

pub const fn mem_range_high(index: usize) -> u8 {
    0x43 + 8 * index as u8
}

pub const fn mem_range_low(index: usize) -> u8 {
    0x44 + 8 * index as u8
}

pub const fn io_base_high(index: usize) -> u8 {
    0x60 + 2 * index as u8
}

pub const fn io_base_low(index: usize) -> u8 {
    0x61 + 2 * index as u8
}

pub const fn irq_level(index: usize) -> u8 {
    0x70 + 2 * index as u8
}

pub const fn irq_type(index: usize) -> u8 {
    0x71 + 2 * index as u8
}

pub const fn dma_channel(index: usize) -> u8 {
    0x74 + index as u8
}

/// I/O address of the READ_DATA port for the value written to SET_RD_DATA.
pub const fn read_port_address(raw: u8) -> u16 {
    (raw as u16) << 2 | 0x3
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ConfigControl: u8 {
        /// Reset
        const RESET = 1 << 0;
        /// Wait for Key
        const WAIT_FOR_KEY = 1 << 1;
        /// Reset CSN to 0
        const RESET_CSN = 1 << 2;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Resource Data Available
        const READY = 1 << 0;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqType: u8 {
        /// Level Triggered
        const LEVEL = 1 << 0;
        /// Active High
        const HIGH = 1 << 1;
    }
}

const READY_POLLS: usize = 100;

/// The three ports every Plug and Play card decodes, split by role.
pub trait PnpIo {
    fn write_address(&mut self, value: u8);

    fn write_data(&mut self, value: u8);

    fn read_data(&mut self, read_port: u16) -> u8;

    fn delay_us(&mut self, us: u32);
}

pub struct PortIo {
    address: Port<u8, WriteOnly>,
    write_data: Port<u8, WriteOnly>,
}

impl PortIo {
    /// # Safety
    ///
    /// The caller must own the ADDRESS and WRITE_DATA ports and every READ_DATA
    /// candidate between 0x203 and 0x3FF.
    pub const unsafe fn new() -> Self {
        Self {
            address: Port::new(ADDRESS),
            write_data: Port::new(WRITE_DATA),
        }
    }
}

impl PnpIo for PortIo {
    fn write_address(&mut self, value: u8) {
        self.address.write(value);
    }

    fn write_data(&mut self, value: u8) {
        self.write_data.write(value);
    }

    fn read_data(&mut self, read_port: u16) -> u8 {
        unsafe { Port::<u8, ReadOnly>::new(read_port) }.read()
    }

    fn delay_us(&mut self, us: u32) {
        pio::io_delay(us);
    }
}

/// Register level access to whichever card is listening.
pub struct Registers<IO> {
    io: IO,
    read_port: u16,
}

impl<IO: PnpIo> Registers<IO> {
    pub const fn new(io: IO) -> Self {
        Self {
            io,
            read_port: read_port_address(0),
        }
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn read_port(&self) -> u16 {
        self.read_port
    }

    /// Uses `raw` as READ_DATA port from now on, cards learn about it through
    /// SET_RD_DATA.
    pub fn set_read_port(&mut self, raw: u8) {
        self.read_port = read_port_address(raw);
    }

    pub fn select(&mut self, register: u8) {
        self.io.write_address(register);
    }

    pub fn write(&mut self, register: u8, value: u8) {
        self.io.write_address(register);
        self.io.write_data(value);
    }

    pub fn read(&mut self, register: u8) -> u8 {
        self.io.write_address(register);
        self.read_data()
    }

    pub fn read_data(&mut self) -> u8 {
        self.io.read_data(self.read_port)
    }

    pub fn delay_us(&mut self, us: u32) {
        self.io.delay_us(us);
    }

    pub fn wait_ready(&mut self) -> Result<()> {
        self.select(STATUS);
        for _ in 0..READY_POLLS {
            if Status::from_bits_retain(self.read_data()).contains(Status::READY) {
                return Ok(());
            }
            self.delay_us(1);
        }

        Err(Error::Timeout)
    }

    pub fn read_resource(&mut self, buffer: &mut [u8]) -> Result<()> {
        for byte in buffer {
            self.wait_ready()?;
            *byte = self.read(RESOURCE_DATA);
        }

        Ok(())
    }

    /// Consumes `length` bytes of resource data to stay in sync with the
    /// card's stream.
    pub fn skip_resource(&mut self, length: usize) -> Result<()> {
        for _ in 0..length {
            self.wait_ready()?;
            self.read(RESOURCE_DATA);
        }

        Ok(())
    }
}
