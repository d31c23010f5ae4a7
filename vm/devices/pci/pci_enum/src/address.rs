// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration space addressing.

use crate::spec::cfg_space;
use bitfield_struct::bitfield;
use thiserror::Error;

/// Number of device slots on a single bus.
pub const MAX_DEVICES: u8 = 32;
/// Number of functions a single device may implement.
pub const MAX_FUNCTIONS: u8 = 8;

/// Errors returned when encoding an out-of-range configuration address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The device number does not fit in the 5-bit device field.
    #[error("device {0} out of range (max {max})", max = MAX_DEVICES - 1)]
    Device(u8),
    /// The function number does not fit in the 3-bit function field.
    #[error("function {0} out of range (max {max})", max = MAX_FUNCTIONS - 1)]
    Function(u8),
    /// The register index does not fit in the 6-bit register field.
    #[error("register {0} out of range (max {max})", max = cfg_space::MAX_REGISTERS - 1)]
    Register(u8),
}

/// The address value handed to a [`ConfigAccess`](crate::ConfigAccess)
/// channel, laid out like the legacy CONFIG_ADDRESS register.
///
/// | Bits  | Field       |
/// |-------|-------------|
/// | 0-1   | byte offset |
/// | 2-7   | register    |
/// | 8-10  | function    |
/// | 11-15 | device      |
/// | 16-23 | bus         |
/// | 31    | enable      |
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct ConfigAddress {
    /// Byte offset within the addressed register, for narrow accesses.
    #[bits(2)]
    pub byte: u8,
    /// Register (dword) index, not a byte offset.
    #[bits(6)]
    pub register: u8,
    /// Function number within the device.
    #[bits(3)]
    pub function: u8,
    /// Device slot on the bus.
    #[bits(5)]
    pub device: u8,
    /// Bus number.
    pub bus: u8,
    #[bits(7)]
    _reserved: u8,
    /// Set for every configuration cycle.
    pub enable: bool,
}

impl ConfigAddress {
    /// Encodes `(bus, device, function, register)` into a configuration
    /// address, rejecting indices that do not fit their fields.
    pub fn encode(bus: u8, device: u8, function: u8, register: u8) -> Result<Self, AddressError> {
        if device >= MAX_DEVICES {
            return Err(AddressError::Device(device));
        }
        if function >= MAX_FUNCTIONS {
            return Err(AddressError::Function(function));
        }
        if register >= cfg_space::MAX_REGISTERS {
            return Err(AddressError::Register(register));
        }
        Ok(Self::from_parts(bus, device, function, register))
    }

    /// Infallible encoding for callers that already bounded their indices.
    pub(crate) fn from_parts(bus: u8, device: u8, function: u8, register: u8) -> Self {
        Self::new()
            .with_bus(bus)
            .with_device(device)
            .with_function(function)
            .with_register(register)
            .with_enable(true)
    }

    /// Byte offset of the addressed location within the function's
    /// configuration space.
    pub fn offset(&self) -> u16 {
        u16::from(self.register()) * 4 + u16::from(self.byte())
    }

    /// The address of function 0 at the same bus and device.
    pub fn function_zero(&self) -> Self {
        self.with_function(0).with_register(0).with_byte(0)
    }
}

impl core::fmt::Display for ConfigAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{} @{:#04x}",
            self.bus(),
            self.device(),
            self.function(),
            self.offset()
        )
    }
}
