// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration space access channel.

use crate::address::ConfigAddress;
use crate::spec::cfg_space;
use crate::spec::cfg_space::HeaderType;
use crate::spec::hwid::ClassCode;
use parking_lot::Mutex;
use std::sync::Arc;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::little_endian::U16;

/// Width of a single configuration space access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessWidth {
    /// 1 byte
    Byte,
    /// 2 bytes
    Word,
    /// 4 bytes
    Dword,
}

impl AccessWidth {
    /// Number of bytes moved by the access.
    pub fn bytes(&self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
        }
    }

    /// Mask covering the low-order bytes moved by the access.
    pub fn mask(&self) -> u32 {
        match self {
            AccessWidth::Byte => 0xFF,
            AccessWidth::Word => 0xFFFF,
            AccessWidth::Dword => 0xFFFF_FFFF,
        }
    }
}

/// A synchronous register channel to one or more configuration space
/// controllers.
///
/// Accesses narrower than a dword operate on the low-order bytes starting at
/// the address's byte offset. The channel is assumed reliable: there is no
/// error path, and a read of a slot with nothing behind it returns
/// [`cfg_space::ABSENT`].
pub trait ConfigAccess {
    /// Reads `width` bytes at `address` on `controller`.
    fn read(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth) -> u32;

    /// Writes the low `width` bytes of `value` at `address` on `controller`.
    fn write(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth, value: u32);

    /// Reads the identification fields of the function at `address` (the
    /// register and byte fields are ignored).
    fn read_header(&mut self, controller: u8, address: ConfigAddress) -> FunctionHeader {
        let mut common = RawCommonHeader::new_zeroed();
        for (register, chunk) in common.as_mut_bytes().chunks_exact_mut(4).enumerate() {
            let value = self.read(
                controller,
                address.with_byte(0).with_register(register as u8),
                AccessWidth::Dword,
            );
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        let interrupt = self.read(
            controller,
            address
                .with_byte(0)
                .with_register(cfg_space::reg::LATENCY_INTERRUPT),
            AccessWidth::Dword,
        );
        FunctionHeader::new(&common, interrupt)
    }

    /// Sizes the register at `address` by writing all-ones and reading back
    /// the writable mask.
    ///
    /// The original value is always written back before returning. Channels
    /// shared between sessions must override this to make the whole sequence
    /// atomic with respect to other accesses.
    fn probe_register(&mut self, controller: u8, address: ConfigAddress) -> RegisterProbe {
        let original = self.read(controller, address, AccessWidth::Dword);
        self.write(controller, address, AccessWidth::Dword, 0xFFFF_FFFF);
        let readback = self.read(controller, address, AccessWidth::Dword);
        self.write(controller, address, AccessWidth::Dword, original);
        RegisterProbe { original, readback }
    }
}

impl<T: ConfigAccess + ?Sized> ConfigAccess for &mut T {
    fn read(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth) -> u32 {
        (**self).read(controller, address, width)
    }

    fn write(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth, value: u32) {
        (**self).write(controller, address, width, value)
    }

    fn read_header(&mut self, controller: u8, address: ConfigAddress) -> FunctionHeader {
        (**self).read_header(controller, address)
    }

    fn probe_register(&mut self, controller: u8, address: ConfigAddress) -> RegisterProbe {
        (**self).probe_register(controller, address)
    }
}

/// Result of a save/overwrite/read/restore sequence on one register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterProbe {
    /// Value held by the register before (and after) the probe.
    pub original: u32,
    /// Value read back after writing all-ones.
    pub readback: u32,
}

/// First 16 bytes of configuration space, shared by every header layout.
#[repr(C)]
#[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawCommonHeader {
    vendor_id: U16,
    device_id: U16,
    command: U16,
    status: U16,
    revision_id: u8,
    prog_if: u8,
    sub_class: u8,
    base_class: u8,
    _cache_line_size: u8,
    _latency_timer: u8,
    header_type: u8,
    _bist: u8,
}

/// The identification fields of a function's configuration header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FunctionHeader {
    /// Vendor ID
    pub vendor_id: u16,
    /// Device ID
    pub device_id: u16,
    /// Command register
    pub command: cfg_space::Command,
    /// Status register
    pub status: u16,
    /// Revision ID
    pub revision_id: u8,
    /// Programming interface
    pub prog_if: u8,
    /// Subclass
    pub sub_class: u8,
    /// Base class
    pub class: ClassCode,
    /// Header layout and multi-function flag
    pub header_type: HeaderType,
    /// Interrupt line, as programmed by firmware
    pub interrupt_line: u8,
    /// Interrupt pin: 0 = none, 1-4 = INTA#-INTD#
    pub interrupt_pin: u8,
}

impl FunctionHeader {
    fn new(common: &RawCommonHeader, interrupt: u32) -> Self {
        Self {
            vendor_id: common.vendor_id.get(),
            device_id: common.device_id.get(),
            command: cfg_space::Command::from_bits(common.command.get()),
            status: common.status.get(),
            revision_id: common.revision_id,
            prog_if: common.prog_if,
            sub_class: common.sub_class,
            class: ClassCode(common.base_class),
            header_type: HeaderType::from_bits(common.header_type),
            interrupt_line: interrupt as u8,
            interrupt_pin: (interrupt >> 8) as u8,
        }
    }
}

/// A [`ConfigAccess`] channel shared between independent enumeration
/// sessions.
///
/// Every access takes the lock. Multi-access sequences (header reads and
/// register probes) hold it for the whole sequence, so a concurrent session
/// can never observe a register while it holds the all-ones probe value.
#[derive(Debug)]
pub struct SharedConfigAccess<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedConfigAccess<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ConfigAccess> SharedConfigAccess<T> {
    /// Wraps `channel` for sharing.
    pub fn new(channel: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// Runs `f` with exclusive access to the underlying channel.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<T: ConfigAccess> ConfigAccess for SharedConfigAccess<T> {
    fn read(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth) -> u32 {
        self.inner.lock().read(controller, address, width)
    }

    fn write(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth, value: u32) {
        self.inner.lock().write(controller, address, width, value)
    }

    fn read_header(&mut self, controller: u8, address: ConfigAddress) -> FunctionHeader {
        self.inner.lock().read_header(controller, address)
    }

    fn probe_register(&mut self, controller: u8, address: ConfigAddress) -> RegisterProbe {
        self.inner.lock().probe_register(controller, address)
    }
}
