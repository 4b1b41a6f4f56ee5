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

#![no_std]

use core::{arch, marker};

use volatile::access::{Readable, Writable};

pub use volatile::access::{ReadOnly, ReadWrite, WriteOnly};

/// Unused port decoded by the POST card, writing to it takes roughly one
/// microsecond on the ISA bus.
const POST: u16 = 0x80;

/// An x86 I/O port of width `T`.
///
/// Legacy buses frequently split one register into an address port that may
/// only be written and a data port that may only be read, so the access type
/// `A` is part of the port's type. It defaults to `ReadWrite`.
#[must_use]
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Port<T: PortType, A = ReadWrite> {
    number: u16,
    r#type: marker::PhantomData<T>,
    access: marker::PhantomData<A>,
}

impl<T: PortType, A> Port<T, A> {
    /// # Safety
    ///
    /// The caller must own the port, accessing a port decoded by another
    /// device has arbitrary side effects.
    pub const unsafe fn new(number: u16) -> Self {
        Self {
            number,
            r#type: marker::PhantomData,
            access: marker::PhantomData,
        }
    }

    pub fn read(self) -> T
    where
        A: Readable,
    {
        unsafe { T::read(self.number) }
    }

    pub fn write(self, value: T)
    where
        A: Writable,
    {
        unsafe { T::write(self.number, value) }
    }
}

pub trait PortType: Copy {
    unsafe fn read(port: u16) -> Self;

    unsafe fn write(port: u16, value: Self);
}

impl PortType for u8 {
    unsafe fn read(port: u16) -> Self {
        let value;
        arch::asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
        value
    }

    unsafe fn write(port: u16, value: Self) {
        arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

impl PortType for u16 {
    unsafe fn read(port: u16) -> Self {
        let value;
        arch::asm!("in ax, dx", out("ax") value, in("dx") port, options(nomem, nostack, preserves_flags));
        value
    }

    unsafe fn write(port: u16, value: Self) {
        arch::asm!("out dx, ax", in("dx") port, in("ax") value, options(nomem, nostack, preserves_flags));
    }
}

/// Busy-waits for about `us` microseconds by writing to the POST port.
pub fn io_delay(us: u32) {
    let post = unsafe { Port::<u8, WriteOnly>::new(POST) };
    for _ in 0..us {
        post.write(0);
    }
}
