// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Base Address Register sizing.
//!
//! There is no register that reports a BAR's size. Instead, all-ones is
//! written to the BAR and read back: address bits the device does not decode
//! are hard-wired to zero, so the readback is the writable address mask, and
//! the lowest set bit of that mask is the size of the window. The original
//! value is written back immediately afterwards (see
//! [`ConfigAccess::probe_register`]).

use crate::ConfigAccess;
use crate::address::ConfigAddress;
use crate::io::RegisterProbe;
use crate::spec::cfg_space;
use crate::spec::cfg_space::BarEncodingBits;
use core::fmt;

/// Address space decoded by a BAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarSpace {
    /// Memory-mapped I/O
    Memory,
    /// Port I/O
    Io,
}

impl fmt::Display for BarSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BarSpace::Memory => "MEM",
            BarSpace::Io => "I/O",
        })
    }
}

/// Width of a memory BAR's address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarWidth {
    /// One register slot.
    Bits32,
    /// Two consecutive register slots, low half first.
    Bits64,
}

impl BarWidth {
    /// Number of register slots the BAR occupies.
    pub fn slots(&self) -> u8 {
        match self {
            BarWidth::Bits32 => 1,
            BarWidth::Bits64 => 2,
        }
    }
}

/// An implemented BAR, as discovered by probing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarProbe {
    /// Memory or I/O space.
    pub space: BarSpace,
    /// 32 or 64 bit. I/O BARs are always 32 bit.
    pub width: BarWidth,
    /// Memory BAR marked prefetchable.
    pub prefetchable: bool,
    /// Currently programmed base address, type bits masked off.
    pub address: u64,
    /// Size of the decoded window in bytes, or 0 if the writable mask was
    /// empty.
    pub size: u64,
}

/// Classifies the result of probing a single BAR register.
///
/// Returns `None` if the BAR is not implemented (the readback is all-ones or
/// zero).
pub fn classify(original: u32, readback: u32) -> Option<BarProbe> {
    if readback == cfg_space::ABSENT || readback == 0 {
        return None;
    }

    let bits = BarEncodingBits::from_bits(readback);
    let (space, width, prefetchable, mask) = if bits.use_pio() {
        (
            BarSpace::Io,
            BarWidth::Bits32,
            false,
            BarEncodingBits::IO_ADDRESS_MASK,
        )
    } else {
        let width = if bits.mem_type() == BarEncodingBits::MEM_TYPE_64 {
            BarWidth::Bits64
        } else {
            BarWidth::Bits32
        };
        (
            BarSpace::Memory,
            width,
            bits.prefetchable(),
            BarEncodingBits::MEMORY_ADDRESS_MASK,
        )
    };

    Some(BarProbe {
        space,
        width,
        prefetchable,
        address: u64::from(original & mask),
        size: lowest_set_bit(u64::from(readback & mask)),
    })
}

fn lowest_set_bit(mask: u64) -> u64 {
    mask & mask.wrapping_neg()
}

/// Probes BAR `index` of the function at `function_address`.
///
/// `bar_count` is the number of BARs the function's header layout exposes.
/// When a 64-bit memory BAR has its upper half inside that range, the upper
/// register is probed too and the address and size cover both halves. A
/// 64-bit BAR in the last slot is reported with its low half only.
///
/// Every register touched holds its original value when this returns.
pub fn probe_bar<A: ConfigAccess + ?Sized>(
    io: &mut A,
    controller: u8,
    function_address: ConfigAddress,
    index: u8,
    bar_count: u8,
) -> Option<BarProbe> {
    let low = bar_address(function_address, index);
    let RegisterProbe { original, readback } = io.probe_register(controller, low);

    let mut bar = match classify(original, readback) {
        Some(bar) => bar,
        None => {
            tracing::trace!(%low, readback, "bar not implemented");
            return None;
        }
    };

    if bar.width == BarWidth::Bits64 {
        if index + 1 >= bar_count {
            tracing::warn!(%low, "64-bit bar in last slot, using low half only");
            return Some(bar);
        }

        let high = io.probe_register(controller, bar_address(function_address, index + 1));
        bar.address |= u64::from(high.original) << 32;
        let mask = (u64::from(high.readback) << 32)
            | u64::from(readback & BarEncodingBits::MEMORY_ADDRESS_MASK);
        bar.size = lowest_set_bit(mask);
    }

    tracing::trace!(%low, address = bar.address, size = bar.size, "bar probed");
    Some(bar)
}

fn bar_address(function_address: ConfigAddress, index: u8) -> ConfigAddress {
    function_address
        .with_byte(0)
        .with_register(cfg_space::reg::BAR0 + index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessWidth;
    use crate::emulated::EmulatedBar;
    use crate::emulated::EmulatedBus;
    use crate::emulated::EmulatedFunction;
    use crate::spec::hwid::ClassCode;
    use crate::spec::hwid::HardwareIds;

    #[test]
    fn classify_memory32() {
        let bar = classify(0x10, 0xFFFF_FFF0).unwrap();
        assert_eq!(bar.space, BarSpace::Memory);
        assert_eq!(bar.width, BarWidth::Bits32);
        assert!(!bar.prefetchable);
        assert_eq!(bar.address, 0x10);
        assert_eq!(bar.size, 16);
    }

    #[test]
    fn classify_io() {
        // type bits of the original value are masked with !0x3
        let bar = classify(0xE0F1 | 0x2, 0xFFFF_FFFD).unwrap();
        assert_eq!(bar.space, BarSpace::Io);
        assert_eq!(bar.address, 0xE0F0);
        assert_eq!(bar.size, 4);

        // upper 16 bits hard-wired to zero
        let bar = classify(0x1001, 0x0000_FF01).unwrap();
        assert_eq!(bar.address, 0x1000);
        assert_eq!(bar.size, 0x100);
    }

    #[test]
    fn classify_prefetchable_64() {
        let bar = classify(0xC000_000C, 0xFFF0_000C).unwrap();
        assert_eq!(bar.space, BarSpace::Memory);
        assert_eq!(bar.width, BarWidth::Bits64);
        assert!(bar.prefetchable);
        assert_eq!(bar.address, 0xC000_0000);
        assert_eq!(bar.size, 0x10_0000);
    }

    #[test]
    fn classify_not_implemented() {
        assert_eq!(classify(0, 0), None);
        assert_eq!(classify(0x1234_5670, 0xFFFF_FFFF), None);
    }

    #[test]
    fn classify_empty_mask() {
        // only type bits are writable: implemented, but no size
        let bar = classify(0x0, 0x0000_0008).unwrap();
        assert_eq!(bar.size, 0);
        assert!(bar.prefetchable);
    }

    fn function_with(bars: &[(u8, EmulatedBar)]) -> EmulatedBus {
        let mut function = EmulatedFunction::new(HardwareIds {
            vendor_id: 0x1af4,
            device_id: 0x1000,
            revision_id: 0,
            prog_if: 0,
            sub_class: 0,
            base_class: ClassCode::NETWORK_CONTROLLER,
        });
        for (index, bar) in bars {
            function = function.with_bar(*index, *bar);
        }
        let mut bus = EmulatedBus::new();
        bus.insert(0, 2, 0, function);
        bus
    }

    #[test]
    fn probe_64bit_both_halves() {
        let mut bus = function_with(&[(0, EmulatedBar::memory64(0x2_0000_0000, 0x40_0000_0000))]);
        let function = ConfigAddress::from_parts(0, 2, 0, 0);

        let bar = probe_bar(&mut bus, 0, function, 0, 6).unwrap();
        assert_eq!(bar.width, BarWidth::Bits64);
        assert_eq!(bar.address, 0x40_0000_0000);
        assert_eq!(bar.size, 0x2_0000_0000);

        // both halves restored
        let low = bus.read(0, function.with_register(4), AccessWidth::Dword);
        let high = bus.read(0, function.with_register(5), AccessWidth::Dword);
        assert_eq!(low, 0x4);
        assert_eq!(high, 0x40);
    }

    #[test]
    fn probe_64bit_last_slot() {
        let mut bus = function_with(&[(0, EmulatedBar::memory64(0x1000, 0xd000_0000))]);
        let function = ConfigAddress::from_parts(0, 2, 0, 0);

        // pretend the header only exposes one BAR
        let bar = probe_bar(&mut bus, 0, function, 0, 1).unwrap();
        assert_eq!(bar.width, BarWidth::Bits64);
        assert_eq!(bar.address, 0xd000_0000);
        assert_eq!(bar.size, 0x1000);
    }

    #[test]
    fn probe_unimplemented() {
        let mut bus = function_with(&[]);
        let function = ConfigAddress::from_parts(0, 2, 0, 0);
        assert_eq!(probe_bar(&mut bus, 0, function, 3, 6), None);
    }
}
