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

use alloc::sync::Arc;

use drv_isa::{Config, ConfigTarget, ConfigWriter, ISA_NDRQ, ISA_NIRQ, ISA_NMEM, ISA_NPORT};
use log::debug;
use spin::Mutex;

use crate::{
    isolation::send_initiation_key,
    reg::{self, ConfigControl, IrqType, PnpIo, Registers},
};

/// IRQ 0 can't be selected, it stands for "no interrupt".
const NO_IRQ: u8 = 0;
/// The cascade channel stands for "no DMA".
const NO_DRQ: u8 = 4;
/// Memory descriptors hold bits 8 to 23.
const MEMORY_LIMIT: u32 = 0xFF_FFFF;

/// Programs `config` into a logical device and activates or deactivates it.
///
/// Every slot is written, slots `config` leaves out are cleared. The
/// configuration is not checked against what the device declared.
///
/// # Panics
///
/// If a memory base is not 256 byte aligned, or a memory base or length does
/// not fit in 24 bits.
pub fn apply_configuration<IO: PnpIo>(
    regs: &mut Registers<IO>,
    target: ConfigTarget,
    config: &Config,
    enable: bool,
) {
    debug!(
        "Configuring CSN {} LDN {} ({})",
        target.csn,
        target.ldn,
        if enable { "enabled" } else { "disabled" }
    );

    // all cards to Sleep, then ours to Config
    send_initiation_key(regs);
    regs.write(reg::WAKE, target.csn);
    regs.write(reg::SET_LDN, target.ldn);

    for i in 0..ISA_NMEM {
        let (start, size) = config
            .memory
            .get(i)
            .map_or((0, 0), |memory| (memory.range.start, memory.range.size));
        assert!(
            start & 0xFF == 0,
            "bogus memory assignment {start:#x} for CSN {} LDN {}",
            target.csn,
            target.ldn
        );
        assert!(
            start <= MEMORY_LIMIT && size <= MEMORY_LIMIT,
            "memory assignment {start:#x}+{size:#x} beyond 24 bits for CSN {} LDN {}",
            target.csn,
            target.ldn
        );
        regs.write(reg::mem_base_high(i), (start >> 16) as u8);
        regs.write(reg::mem_base_low(i), (start >> 8) as u8);
        regs.write(reg::mem_range_high(i), (size >> 16) as u8);
        regs.write(reg::mem_range_low(i), (size >> 8) as u8);
    }

    for i in 0..ISA_NPORT {
        let start = config.ports.get(i).map_or(0, |port| port.start);
        regs.write(reg::io_base_high(i), (start >> 8) as u8);
        regs.write(reg::io_base_low(i), start as u8);
    }

    for i in 0..ISA_NIRQ {
        match config.irqs.get(i).filter(|mask| **mask != 0) {
            Some(mask) => {
                regs.write(reg::irq_level(i), mask.trailing_zeros() as u8);
                regs.write(reg::irq_type(i), IrqType::HIGH.bits());
            }
            None => regs.write(reg::irq_level(i), NO_IRQ),
        }
    }

    for i in 0..ISA_NDRQ {
        let channel = match config.drqs.get(i) {
            Some(&mask) if mask != 0 => mask.trailing_zeros() as u8,
            _ => NO_DRQ,
        };
        regs.write(reg::dma_channel(i), channel);
    }

    regs.write(reg::ACTIVATE, enable as u8);

    regs.write(reg::CONFIG_CONTROL, ConfigControl::WAIT_FOR_KEY.bits());
}

/// Writer installed for the allocator, shares the bus with discovery.
pub struct PnpConfigWriter<IO> {
    regs: Arc<Mutex<Registers<IO>>>,
}

impl<IO> PnpConfigWriter<IO> {
    pub fn new(regs: Arc<Mutex<Registers<IO>>>) -> Self {
        Self { regs }
    }
}

impl<IO> Clone for PnpConfigWriter<IO> {
    fn clone(&self) -> Self {
        Self {
            regs: self.regs.clone(),
        }
    }
}

impl<IO: PnpIo> ConfigWriter for PnpConfigWriter<IO> {
    fn apply_configuration(&self, target: ConfigTarget, config: &Config, enable: bool) {
        let mut regs = self.regs.lock();
        apply_configuration(&mut *regs, target, config, enable);
    }
}
