// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI spec.
//!
//! This module MUST NOT contain any vendor-specific constants!

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    use core::fmt;

    /// A collection of hard-coded hardware IDs specific to a particular PCI
    /// function, as reflected in their corresponding PCI configuration space
    /// registers.
    ///
    /// See PCI 2.3 Spec - 6.2.1 for details on each of these fields.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: u8,
        pub sub_class: u8,
        pub base_class: ClassCode,
    }

    /// ClassCode identifies the PCI function's type.
    ///
    /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>. The set is
    /// open: any byte is a valid class code, and `UNCLASSIFIED` doubles as the
    /// "any class" wildcard when filtering.
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct ClassCode(pub u8);

    impl ClassCode {
        pub const UNCLASSIFIED: Self = Self(0x00);
        pub const MASS_STORAGE_CONTROLLER: Self = Self(0x01);
        pub const NETWORK_CONTROLLER: Self = Self(0x02);
        pub const DISPLAY_CONTROLLER: Self = Self(0x03);
        pub const MULTIMEDIA_CONTROLLER: Self = Self(0x04);
        pub const MEMORY_CONTROLLER: Self = Self(0x05);
        pub const BRIDGE: Self = Self(0x06);
        pub const SIMPLE_COMMUNICATION_CONTROLLER: Self = Self(0x07);
        pub const BASE_SYSTEM_PERIPHERAL: Self = Self(0x08);
        pub const INPUT_DEVICE_CONTROLLER: Self = Self(0x09);
        pub const DOCKING_STATION: Self = Self(0x0A);
        pub const PROCESSOR: Self = Self(0x0B);
        pub const SERIAL_BUS_CONTROLLER: Self = Self(0x0C);
        pub const WIRELESS_CONTROLLER: Self = Self(0x0D);
        pub const INTELLIGENT_CONTROLLER: Self = Self(0x0E);
        pub const SATELLITE_COMMUNICATION_CONTROLLER: Self = Self(0x0F);
        pub const ENCRYPTION_CONTROLLER: Self = Self(0x10);
        pub const SIGNAL_PROCESSING_CONTROLLER: Self = Self(0x11);
        pub const PROCESSING_ACCELERATOR: Self = Self(0x12);
        pub const NONESSENTIAL_INSTRUMENTATION: Self = Self(0x13);
        // 0x14 - 0x3F: Reserved
        pub const CO_PROCESSOR: Self = Self(0x40);
        // 0x41 - 0xFE: Reserved
        /// Vendor specific
        pub const UNASSIGNED: Self = Self(0xFF);

        pub fn is_reserved(&self) -> bool {
            let c = &self.0;
            (0x14..=0x3f).contains(c) || (0x41..=0xfe).contains(c)
        }

        fn name(&self) -> Option<&'static str> {
            let name = match *self {
                Self::UNCLASSIFIED => "UNCLASSIFIED",
                Self::MASS_STORAGE_CONTROLLER => "MASS_STORAGE_CONTROLLER",
                Self::NETWORK_CONTROLLER => "NETWORK_CONTROLLER",
                Self::DISPLAY_CONTROLLER => "DISPLAY_CONTROLLER",
                Self::MULTIMEDIA_CONTROLLER => "MULTIMEDIA_CONTROLLER",
                Self::MEMORY_CONTROLLER => "MEMORY_CONTROLLER",
                Self::BRIDGE => "BRIDGE",
                Self::SIMPLE_COMMUNICATION_CONTROLLER => "SIMPLE_COMMUNICATION_CONTROLLER",
                Self::BASE_SYSTEM_PERIPHERAL => "BASE_SYSTEM_PERIPHERAL",
                Self::INPUT_DEVICE_CONTROLLER => "INPUT_DEVICE_CONTROLLER",
                Self::DOCKING_STATION => "DOCKING_STATION",
                Self::PROCESSOR => "PROCESSOR",
                Self::SERIAL_BUS_CONTROLLER => "SERIAL_BUS_CONTROLLER",
                Self::WIRELESS_CONTROLLER => "WIRELESS_CONTROLLER",
                Self::INTELLIGENT_CONTROLLER => "INTELLIGENT_CONTROLLER",
                Self::SATELLITE_COMMUNICATION_CONTROLLER => "SATELLITE_COMMUNICATION_CONTROLLER",
                Self::ENCRYPTION_CONTROLLER => "ENCRYPTION_CONTROLLER",
                Self::SIGNAL_PROCESSING_CONTROLLER => "SIGNAL_PROCESSING_CONTROLLER",
                Self::PROCESSING_ACCELERATOR => "PROCESSING_ACCELERATOR",
                Self::NONESSENTIAL_INSTRUMENTATION => "NONESSENTIAL_INSTRUMENTATION",
                Self::CO_PROCESSOR => "CO_PROCESSOR",
                Self::UNASSIGNED => "UNASSIGNED",
                _ => return None,
            };
            Some(name)
        }
    }

    impl fmt::Debug for ClassCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.name() {
                Some(name) => f.write_str(name),
                None => write!(f, "ClassCode({:#04x})", self.0),
            }
        }
    }

    impl fmt::Display for ClassCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.is_reserved() {
                return write!(f, "RESERVED({:#04x})", self.0);
            }
            fmt::Debug::fmt(self, f)
        }
    }

    impl From<u8> for ClassCode {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ClassCode> for u8 {
        fn from(c: ClassCode) -> Self {
            c.0
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6
#[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
pub mod cfg_space {
    use bitfield_struct::bitfield;

    /// Register (dword) indices into the type 00h configuration space header.
    ///
    /// Table pulled from <https://wiki.osdev.org/PCI>
    ///
    /// | Reg | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
    /// |-----|--------|----------------------------|-------------|---------------------|--------------------- |
    /// | 0   | 0x0    | Device ID                  |             | Vendor ID           |                      |
    /// | 1   | 0x4    | Status                     |             | Command             |                      |
    /// | 2   | 0x8    | Class code                 |             |                     | Revision ID          |
    /// | 3   | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
    /// | 4   | 0x10   | Base address #0 (BAR0)     |             |                     |                      |
    /// | ... |        |                            |             |                     |                      |
    /// | 9   | 0x24   | Base address #5 (BAR5)     |             |                     |                      |
    /// | 10  | 0x28   | Cardbus CIS Pointer        |             |                     |                      |
    /// | 11  | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
    /// | 12  | 0x30   | Expansion ROM base address |             |                     |                      |
    /// | 13  | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
    /// | 14  | 0x38   | Reserved                   |             |                     |                      |
    /// | 15  | 0x3C   | Max latency                | Min Grant   | Interrupt PIN       | Interrupt Line       |
    pub mod reg {
        pub const DEVICE_VENDOR: u8 = 0;
        pub const STATUS_COMMAND: u8 = 1;
        pub const CLASS_REVISION: u8 = 2;
        pub const BIST_HEADER: u8 = 3;
        pub const BAR0: u8 = 4;
        pub const SUBSYSTEM_ID: u8 = 11;
        pub const LATENCY_INTERRUPT: u8 = 15;
    }

    /// Number of dword registers addressable in the legacy configuration space.
    pub const MAX_REGISTERS: u8 = 64;

    /// Number of BARs exposed by a type 00h (endpoint) header.
    pub const TYPE0_BAR_COUNT: u8 = 6;
    /// Number of BARs exposed by a type 01h (PCI-to-PCI bridge) header.
    pub const TYPE1_BAR_COUNT: u8 = 2;

    /// Value returned by a configuration read of a slot with nothing behind it.
    pub const ABSENT: u32 = 0xFFFF_FFFF;

    /// Header Type register
    #[bitfield(u8)]
    #[derive(PartialEq, Eq)]
    pub struct HeaderType {
        /// 0 = endpoint, 1 = PCI-to-PCI bridge, 2 = CardBus bridge
        #[bits(7)]
        pub layout: u8,
        pub multi_function: bool,
    }

    impl HeaderType {
        pub const LAYOUT_ENDPOINT: u8 = 0;
        pub const LAYOUT_BRIDGE: u8 = 1;

        /// Number of BARs the header layout exposes.
        pub fn bar_count(&self) -> u8 {
            if self.layout() == Self::LAYOUT_BRIDGE {
                TYPE1_BAR_COUNT
            } else {
                TYPE0_BAR_COUNT
            }
        }
    }

    /// BAR in-band encoding bits.
    ///
    /// The low bits of the BAR are not actually part of the address.
    /// Instead, they are used to in-band encode various bits of
    /// metadata about the BAR, and are masked off when determining the
    /// actual address.
    #[bitfield(u32)]
    pub struct BarEncodingBits {
        pub use_pio: bool,

        /// 0b00 = 32 bit, 0b10 = 64 bit.
        /// Only used in MMIO
        #[bits(2)]
        pub mem_type: u8,
        pub prefetchable: bool,

        #[bits(28)]
        _address: u32,
    }

    impl BarEncodingBits {
        pub const MEM_TYPE_32: u8 = 0b00;
        pub const MEM_TYPE_64: u8 = 0b10;

        pub const MEMORY_ADDRESS_MASK: u32 = !0xF;
        pub const IO_ADDRESS_MASK: u32 = !0x3;
    }

    /// Command Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Command {
        pub pio_enabled: bool,
        pub mmio_enabled: bool,
        pub bus_master: bool,
        pub special_cycles: bool,
        pub enable_memory_write_invalidate: bool,
        pub vga_palette_snoop: bool,
        pub parity_error_response: bool,
        /// must be 0
        #[bits(1)]
        _reserved: u16,
        pub enable_serr: bool,
        pub enable_fast_b2b: bool,
        pub intx_disable: bool,
        #[bits(5)]
        _reserved2: u16,
    }
}
