// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory configuration space, for exercising enumeration without
//! hardware.
//!
//! Each [`EmulatedFunction`] models a type 00h style header with up to six
//! BARs whose writable masks behave like real hardware: bits below the BAR's
//! size and the type bits are hard-wired, so writing all-ones and reading
//! back yields the size mask.

use crate::ConfigAccess;
use crate::address::ConfigAddress;
use crate::io::AccessWidth;
use crate::spec::cfg_space;
use crate::spec::cfg_space::BarEncodingBits;
use crate::spec::cfg_space::HeaderType;
use crate::spec::hwid::HardwareIds;
use std::collections::BTreeMap;

const SUPPORTED_COMMAND_BITS: u16 = cfg_space::Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_special_cycles(true)
    .with_enable_memory_write_invalidate(true)
    .with_vga_palette_snoop(true)
    .with_parity_error_response(true)
    .with_enable_serr(true)
    .with_enable_fast_b2b(true)
    .with_intx_disable(true)
    .into_bits();

const BAR_SLOTS: usize = cfg_space::TYPE0_BAR_COUNT as usize;

/// A BAR to back with emulated registers.
///
/// Sizes are rounded up to a power of two, and to at least the smallest
/// window the BAR's type bits allow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EmulatedBar {
    /// 32-bit memory BAR
    Memory32 {
        /// Window size in bytes
        size: u32,
        /// Initially programmed base address
        base: u32,
        /// Prefetchable bit
        prefetchable: bool,
    },
    /// 64-bit memory BAR, occupying this slot and the next
    Memory64 {
        /// Window size in bytes
        size: u64,
        /// Initially programmed base address
        base: u64,
        /// Prefetchable bit
        prefetchable: bool,
    },
    /// I/O BAR
    Io {
        /// Window size in bytes
        size: u32,
        /// Initially programmed base port
        base: u32,
    },
}

impl EmulatedBar {
    /// A non-prefetchable 32-bit memory BAR.
    pub fn memory32(size: u32, base: u32) -> Self {
        Self::Memory32 {
            size,
            base,
            prefetchable: false,
        }
    }

    /// A non-prefetchable 64-bit memory BAR.
    pub fn memory64(size: u64, base: u64) -> Self {
        Self::Memory64 {
            size,
            base,
            prefetchable: false,
        }
    }

    /// An I/O BAR.
    pub fn io(size: u32, base: u32) -> Self {
        Self::Io { size, base }
    }

    /// Sets the prefetchable bit of a memory BAR. No-op for I/O BARs.
    pub fn prefetchable(self) -> Self {
        match self {
            Self::Memory32 { size, base, .. } => Self::Memory32 {
                size,
                base,
                prefetchable: true,
            },
            Self::Memory64 { size, base, .. } => Self::Memory64 {
                size,
                base,
                prefetchable: true,
            },
            bar @ Self::Io { .. } => bar,
        }
    }
}

#[derive(Debug, Clone)]
struct EmulatedFunctionState {
    /// The command register
    command: cfg_space::Command,
    /// OS-configured BARs
    base_addresses: [u32; BAR_SLOTS],
    /// Scratch register, conventionally the firmware-assigned IRQ.
    interrupt_line: u8,
    /// A read/write register with no effect on the emulation
    latency_timer: u8,
}

/// Emulated configuration space of a single function.
#[derive(Debug, Clone)]
pub struct EmulatedFunction {
    // Fixed configuration
    hardware_ids: HardwareIds,
    header_layout: u8,
    multi_function_bit: bool,
    interrupt_pin: u8,
    bar_masks: [u32; BAR_SLOTS],
    bar_flags: [u32; BAR_SLOTS],

    // Volatile state
    state: EmulatedFunctionState,
}

impl EmulatedFunction {
    /// Creates an endpoint function with no BARs and no interrupt pin.
    pub fn new(hardware_ids: HardwareIds) -> Self {
        Self {
            hardware_ids,
            header_layout: HeaderType::LAYOUT_ENDPOINT,
            multi_function_bit: false,
            interrupt_pin: 0,
            bar_masks: [0; BAR_SLOTS],
            bar_flags: [0; BAR_SLOTS],
            state: EmulatedFunctionState {
                command: cfg_space::Command::new(),
                base_addresses: [0; BAR_SLOTS],
                interrupt_line: 0,
                latency_timer: 0,
            },
        }
    }

    /// Sets the header layout field (1 = PCI-to-PCI bridge).
    ///
    /// All six BAR slots stay backed regardless of layout, so a bridge can
    /// model registers past BAR1 that an enumerator must not size.
    pub fn with_header_layout(mut self, layout: u8) -> Self {
        self.header_layout = layout;
        self
    }

    /// If the device is multi-function, enable bit 7 in the Header register.
    pub fn with_multi_function_bit(mut self, bit: bool) -> Self {
        self.multi_function_bit = bit;
        self
    }

    /// Sets the interrupt pin register (0 = none, 1-4 = INTA#-INTD#).
    pub fn with_interrupt_pin(mut self, pin: u8) -> Self {
        self.interrupt_pin = pin;
        self
    }

    /// Backs BAR `index` (and `index + 1` for 64-bit BARs).
    ///
    /// Panics if the BAR does not fit in the six available slots, or if its
    /// size rounds up past the largest power of two the BAR can hold.
    pub fn with_bar(mut self, index: u8, bar: EmulatedBar) -> Self {
        let index = index as usize;
        match bar {
            EmulatedBar::Memory32 {
                size,
                base,
                prefetchable,
            } => {
                assert!(index < BAR_SLOTS);
                let size = size.max(16).next_power_of_two();
                self.bar_masks[index] = !(size - 1) & BarEncodingBits::MEMORY_ADDRESS_MASK;
                self.bar_flags[index] = BarEncodingBits::new()
                    .with_mem_type(BarEncodingBits::MEM_TYPE_32)
                    .with_prefetchable(prefetchable)
                    .into_bits();
                self.state.base_addresses[index] = base;
            }
            EmulatedBar::Memory64 {
                size,
                base,
                prefetchable,
            } => {
                // use 64-bit aware BARs
                assert!(index + 1 < BAR_SLOTS);
                let size = size.max(16).next_power_of_two();
                let mask64 = !(size - 1);
                self.bar_masks[index] = mask64 as u32 & BarEncodingBits::MEMORY_ADDRESS_MASK;
                self.bar_flags[index] = BarEncodingBits::new()
                    .with_mem_type(BarEncodingBits::MEM_TYPE_64)
                    .with_prefetchable(prefetchable)
                    .into_bits();
                self.bar_masks[index + 1] = (mask64 >> 32) as u32;
                self.bar_flags[index + 1] = 0;
                self.state.base_addresses[index] = base as u32;
                self.state.base_addresses[index + 1] = (base >> 32) as u32;
            }
            EmulatedBar::Io { size, base } => {
                assert!(index < BAR_SLOTS);
                let size = size.max(4).next_power_of_two();
                self.bar_masks[index] = !(size - 1) & BarEncodingBits::IO_ADDRESS_MASK;
                self.bar_flags[index] = BarEncodingBits::new().with_use_pio(true).into_bits();
                self.state.base_addresses[index] = base;
            }
        }
        let slots = if matches!(bar, EmulatedBar::Memory64 { .. }) {
            index..index + 2
        } else {
            index..index + 1
        };
        for slot in slots {
            self.state.base_addresses[slot] =
                self.state.base_addresses[slot] & self.bar_masks[slot] | self.bar_flags[slot];
        }
        self
    }

    /// The raw BAR registers, as software would read them.
    pub fn base_addresses(&self) -> [u32; BAR_SLOTS] {
        self.state.base_addresses
    }

    /// The command register.
    pub fn command(&self) -> cfg_space::Command {
        self.state.command
    }

    fn header_type(&self) -> HeaderType {
        HeaderType::new()
            .with_layout(self.header_layout)
            .with_multi_function(self.multi_function_bit)
    }

    /// Read from the config space. `register` is a dword index.
    pub fn read_u32(&self, register: u8) -> u32 {
        use cfg_space::reg;

        match register {
            reg::DEVICE_VENDOR => {
                (self.hardware_ids.device_id as u32) << 16 | self.hardware_ids.vendor_id as u32
            }
            reg::STATUS_COMMAND => self.state.command.into_bits() as u32,
            reg::CLASS_REVISION => {
                (u8::from(self.hardware_ids.base_class) as u32) << 24
                    | (self.hardware_ids.sub_class as u32) << 16
                    | (self.hardware_ids.prog_if as u32) << 8
                    | self.hardware_ids.revision_id as u32
            }
            reg::BIST_HEADER => {
                (self.header_type().into_bits() as u32) << 16
                    | (self.state.latency_timer as u32) << 8
            }
            r if (reg::BAR0..reg::BAR0 + BAR_SLOTS as u8).contains(&r) => {
                self.state.base_addresses[(r - reg::BAR0) as usize]
            }
            reg::LATENCY_INTERRUPT => {
                self.state.interrupt_line as u32 | (self.interrupt_pin as u32) << 8
            }
            _ => 0,
        }
    }

    /// Write to the config space. `register` is a dword index.
    pub fn write_u32(&mut self, register: u8, val: u32) {
        use cfg_space::reg;

        match register {
            reg::STATUS_COMMAND => {
                let bits = val as u16;
                if bits & !SUPPORTED_COMMAND_BITS != 0 {
                    tracing::warn!(register, val, "setting invalid command bits");
                }
                // still do our best
                self.state.command = cfg_space::Command::from_bits(bits & SUPPORTED_COMMAND_BITS);
            }
            reg::BIST_HEADER => {
                // allow writes to the latency timer
                self.state.latency_timer = (val >> 8) as u8;
            }
            r if (reg::BAR0..reg::BAR0 + BAR_SLOTS as u8).contains(&r) => {
                let index = (r - reg::BAR0) as usize;
                self.state.base_addresses[index] =
                    val & self.bar_masks[index] | self.bar_flags[index];
            }
            reg::LATENCY_INTERRUPT => {
                self.state.interrupt_line = val as u8;
            }
            // all other header registers are read-only here
            _ => {}
        }
    }
}

/// A flat collection of emulated functions behind one controller.
///
/// Slots without a function read as all-ones and ignore writes, like an
/// unclaimed configuration cycle on real hardware.
#[derive(Debug, Clone, Default)]
pub struct EmulatedBus {
    controller: u8,
    functions: BTreeMap<(u8, u8, u8), EmulatedFunction>,
}

impl EmulatedBus {
    /// Creates an empty bus on controller 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers on controller `controller` instead of 0.
    pub fn with_controller(mut self, controller: u8) -> Self {
        self.controller = controller;
        self
    }

    /// Places `function` at `bus:device.function_number`, replacing whatever
    /// was there.
    pub fn insert(&mut self, bus: u8, device: u8, function_number: u8, function: EmulatedFunction) {
        self.functions
            .insert((bus, device, function_number), function);
    }

    /// The function at `bus:device.function_number`, if any.
    pub fn function(&self, bus: u8, device: u8, function_number: u8) -> Option<&EmulatedFunction> {
        self.functions.get(&(bus, device, function_number))
    }

    /// Iterates over every populated slot in address order.
    pub fn functions(&self) -> impl Iterator<Item = ((u8, u8, u8), &EmulatedFunction)> {
        self.functions.iter().map(|(k, v)| (*k, v))
    }

    fn lookup(&self, controller: u8, address: ConfigAddress) -> Option<&EmulatedFunction> {
        if controller != self.controller {
            return None;
        }
        self.functions
            .get(&(address.bus(), address.device(), address.function()))
    }

    fn lookup_mut(
        &mut self,
        controller: u8,
        address: ConfigAddress,
    ) -> Option<&mut EmulatedFunction> {
        if controller != self.controller {
            return None;
        }
        self.functions
            .get_mut(&(address.bus(), address.device(), address.function()))
    }
}

impl ConfigAccess for EmulatedBus {
    fn read(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth) -> u32 {
        let dword = match self.lookup(controller, address) {
            Some(function) => function.read_u32(address.register()),
            None => cfg_space::ABSENT,
        };
        (dword >> (u32::from(address.byte()) * 8)) & width.mask()
    }

    fn write(&mut self, controller: u8, address: ConfigAddress, width: AccessWidth, value: u32) {
        let Some(function) = self.lookup_mut(controller, address) else {
            tracing::trace!(%address, "write to absent function dropped");
            return;
        };
        let register = address.register();
        let value = if width == AccessWidth::Dword {
            value
        } else {
            let shift = u32::from(address.byte()) * 8;
            let mask = width.mask() << shift;
            function.read_u32(register) & !mask | (value << shift) & mask
        };
        function.write_u32(register, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::hwid::ClassCode;

    fn ids() -> HardwareIds {
        HardwareIds {
            vendor_id: 0x1111,
            device_id: 0x2222,
            revision_id: 1,
            prog_if: 0,
            sub_class: 0x04,
            base_class: ClassCode::BRIDGE,
        }
    }

    fn read_cfg(bus: &mut EmulatedBus, register: u8) -> u32 {
        bus.read(0, ConfigAddress::from_parts(0, 0, 0, register), AccessWidth::Dword)
    }

    fn write_cfg(bus: &mut EmulatedBus, register: u8, value: u32) {
        bus.write(
            0,
            ConfigAddress::from_parts(0, 0, 0, register),
            AccessWidth::Dword,
            value,
        )
    }

    #[test]
    fn absent_slot() {
        let mut bus = EmulatedBus::new();
        bus.insert(0, 0, 0, EmulatedFunction::new(ids()));

        let addr = ConfigAddress::from_parts(0, 1, 0, 0);
        assert_eq!(bus.read(0, addr, AccessWidth::Dword), 0xFFFF_FFFF);
        assert_eq!(bus.read(0, addr, AccessWidth::Word), 0xFFFF);
        bus.write(0, addr, AccessWidth::Dword, 0);
        assert_eq!(bus.read(0, addr, AccessWidth::Dword), 0xFFFF_FFFF);

        // wrong controller
        assert_eq!(read_cfg(&mut bus, 0), 0x2222_1111);
        assert_eq!(
            bus.read(1, ConfigAddress::from_parts(0, 0, 0, 0), AccessWidth::Dword),
            0xFFFF_FFFF
        );
    }

    #[test]
    fn bar_masks() {
        let mut bus = EmulatedBus::new();
        bus.insert(
            0,
            0,
            0,
            EmulatedFunction::new(ids())
                .with_bar(0, EmulatedBar::memory32(0x100, 0xfebf_1000).prefetchable())
                .with_bar(1, EmulatedBar::io(8, 0xc040))
                .with_bar(2, EmulatedBar::memory64(0x4000, 0x1_0000_0000)),
        );

        assert_eq!(read_cfg(&mut bus, 4), 0xfebf_1008);
        write_cfg(&mut bus, 4, 0xFFFF_FFFF);
        assert_eq!(read_cfg(&mut bus, 4), 0xffff_ff08);

        assert_eq!(read_cfg(&mut bus, 5), 0xc041);
        write_cfg(&mut bus, 5, 0xFFFF_FFFF);
        assert_eq!(read_cfg(&mut bus, 5), 0xffff_fff9);

        assert_eq!(read_cfg(&mut bus, 6), 0x4);
        assert_eq!(read_cfg(&mut bus, 7), 0x1);
        write_cfg(&mut bus, 6, 0xFFFF_FFFF);
        write_cfg(&mut bus, 7, 0xFFFF_FFFF);
        assert_eq!(read_cfg(&mut bus, 6), 0xffff_c004);
        assert_eq!(read_cfg(&mut bus, 7), 0xffff_ffff);

        // unbacked BAR slots are hard-wired to zero
        write_cfg(&mut bus, 8, 0xFFFF_FFFF);
        assert_eq!(read_cfg(&mut bus, 8), 0);
    }

    #[test]
    fn command_register() {
        let mut bus = EmulatedBus::new();
        bus.insert(0, 0, 0, EmulatedFunction::new(ids()));

        let addr = ConfigAddress::from_parts(0, 0, 0, cfg_space::reg::STATUS_COMMAND);
        bus.write(0, addr, AccessWidth::Word, 0x0006);
        assert_eq!(bus.read(0, addr, AccessWidth::Word), 0x0006);
        let function = bus.function(0, 0, 0).unwrap();
        assert!(function.command().mmio_enabled());
        assert!(function.command().bus_master());

        // reserved bits are dropped
        bus.write(0, addr, AccessWidth::Word, 0x0080);
        assert_eq!(bus.read(0, addr, AccessWidth::Word), 0);
    }

    #[test]
    fn header_type_register() {
        let mut bus = EmulatedBus::new();
        bus.insert(
            0,
            0,
            0,
            EmulatedFunction::new(ids())
                .with_header_layout(HeaderType::LAYOUT_BRIDGE)
                .with_multi_function_bit(true),
        );
        assert_eq!(read_cfg(&mut bus, 3), 0x0081_0000);
        write_cfg(&mut bus, 3, 0x0000_4000);
        assert_eq!(read_cfg(&mut bus, 3), 0x0081_4000);
    }
}
