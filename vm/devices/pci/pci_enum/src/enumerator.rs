// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resumable, filtered enumeration of PCI functions and their BARs.
//!
//! An [`Enumerator`] walks bus → device → function → BAR and stops at the
//! first BAR of a function matching its [`ScanFilter`]. It remembers where it
//! stopped, so the next [`Enumerator::scan`] call picks up right after the
//! previous match. Each implemented BAR of a matching function is reported as
//! its own [`DeviceInfo`].

use crate::ConfigAccess;
use crate::address::ConfigAddress;
use crate::address::MAX_DEVICES;
use crate::address::MAX_FUNCTIONS;
use crate::bar;
use crate::bar::BarSpace;
use crate::bar::BarWidth;
use crate::io::AccessWidth;
use crate::io::FunctionHeader;
use crate::irq::IrqMapper;
use crate::spec::cfg_space;
use crate::spec::hwid::ClassCode;
use core::fmt;
use thiserror::Error;

/// Bounds of the walk, and the controller to walk on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanLimits {
    /// Number of buses to scan, starting at bus 0 (1..=256).
    pub buses: u16,
    /// Number of device slots per bus (1..=32).
    pub devices: u8,
    /// Number of functions per device (1..=8).
    pub functions: u8,
    /// Controller index passed to the configuration channel.
    pub controller: u8,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            buses: 1,
            devices: MAX_DEVICES,
            functions: MAX_FUNCTIONS,
            controller: 0,
        }
    }
}

/// Error returned for scan limits that cannot be encoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    /// Bus count outside 1..=256.
    #[error("bus count {0} must be within 1..=256")]
    Buses(u16),
    /// Device count outside 1..=32.
    #[error("device count {0} must be within 1..={max}", max = MAX_DEVICES)]
    Devices(u8),
    /// Function count outside 1..=8.
    #[error("function count {0} must be within 1..={max}", max = MAX_FUNCTIONS)]
    Functions(u8),
}

impl ScanLimits {
    /// Checks that every bound fits the configuration address fields.
    pub fn validate(&self) -> Result<(), LimitsError> {
        if !(1..=256).contains(&self.buses) {
            return Err(LimitsError::Buses(self.buses));
        }
        if !(1..=MAX_DEVICES).contains(&self.devices) {
            return Err(LimitsError::Devices(self.devices));
        }
        if !(1..=MAX_FUNCTIONS).contains(&self.functions) {
            return Err(LimitsError::Functions(self.functions));
        }
        Ok(())
    }
}

/// Criteria a function (and BAR) must meet to be reported.
///
/// The vendor/device filter only applies when both IDs are non-zero. A lone
/// vendor or device ID filters nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Base class to match. [`ClassCode::UNCLASSIFIED`] matches any class.
    pub class: ClassCode,
    /// Vendor ID to match, together with `device_id`.
    pub vendor_id: u16,
    /// Device ID to match, together with `vendor_id`.
    pub device_id: u16,
    /// Only report this function number.
    pub function: Option<u8>,
    /// Only report this BAR index.
    pub bar: Option<u8>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::any()
    }
}

impl ScanFilter {
    /// A filter matching every implemented BAR of every function.
    pub const fn any() -> Self {
        Self {
            class: ClassCode::UNCLASSIFIED,
            vendor_id: 0,
            device_id: 0,
            function: None,
            bar: None,
        }
    }

    /// Only match functions of base class `class`.
    pub fn with_class(mut self, class: ClassCode) -> Self {
        self.class = class;
        self
    }

    /// Only match functions with this vendor and device ID.
    pub fn with_ids(mut self, vendor_id: u16, device_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.device_id = device_id;
        self
    }

    /// Only match function number `function`.
    pub fn with_function(mut self, function: u8) -> Self {
        self.function = Some(function);
        self
    }

    /// Only match BAR index `bar`.
    pub fn with_bar(mut self, bar: u8) -> Self {
        self.bar = Some(bar);
        self
    }

    /// Whether every criterion is at its "any" value.
    pub fn is_wildcard(&self) -> bool {
        *self == Self::any()
    }

    fn matches_header(&self, header: &FunctionHeader) -> bool {
        if self.class != ClassCode::UNCLASSIFIED && header.class != self.class {
            return false;
        }
        if self.vendor_id != 0
            && self.device_id != 0
            && (header.vendor_id != self.vendor_id || header.device_id != self.device_id)
        {
            return false;
        }
        true
    }
}

/// One matching BAR of one matching function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bus number
    pub bus: u8,
    /// Device slot
    pub device: u8,
    /// Function number
    pub function: u8,
    /// Vendor ID
    pub vendor_id: u16,
    /// Device ID
    pub device_id: u16,
    /// Base class
    pub class: ClassCode,
    /// IRQ routed to the function's interrupt pin, if it has one.
    pub irq: Option<u32>,
    /// BAR index
    pub bar: u8,
    /// Address space the BAR decodes
    pub space: BarSpace,
    /// 32 or 64 bit BAR
    pub width: BarWidth,
    /// Prefetchable memory BAR
    pub prefetchable: bool,
    /// Currently programmed base address
    pub address: u64,
    /// Window size in bytes
    pub size: u64,
}

impl DeviceInfo {
    /// Configuration address of `register` in this function.
    pub(crate) fn config_address(&self, register: u8) -> ConfigAddress {
        ConfigAddress::from_parts(self.bus, self.device, self.function, register)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{} {:04x}:{:04x} class {:#04x} bar {} {} {:#x}-{:#x}",
            self.bus,
            self.device,
            self.function,
            self.vendor_id,
            self.device_id,
            self.class.0,
            self.bar,
            self.space,
            self.address,
            self.address.saturating_add(self.size.saturating_sub(1)),
        )?;
        match self.irq {
            Some(irq) => write!(f, " irq {irq}"),
            None => write!(f, " irq none"),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
struct Cursor {
    bus: u16,
    device: u8,
    function: u8,
    bar: u8,
}

/// A resumable scan session over one configuration space controller.
///
/// The enumerator owns its filter and cursor but never the configuration
/// channel, which is passed to every call. Independent sessions may run side
/// by side as long as the channel serializes BAR probes (see
/// [`SharedConfigAccess`](crate::SharedConfigAccess)).
pub struct Enumerator<M> {
    limits: ScanLimits,
    irq_mapper: M,
    filter: ScanFilter,
    /// Set once the session's filter is final.
    seeded: bool,
    cursor: Cursor,
}

impl<M: IrqMapper> Enumerator<M> {
    /// Creates an enumerator, already reset as if by [`Self::begin`].
    pub fn new(limits: ScanLimits, irq_mapper: M) -> Result<Self, LimitsError> {
        limits.validate()?;
        let mut this = Self {
            limits,
            irq_mapper,
            filter: ScanFilter::any(),
            seeded: false,
            cursor: Cursor::default(),
        };
        this.begin();
        Ok(this)
    }

    /// The bounds this enumerator walks.
    pub fn limits(&self) -> &ScanLimits {
        &self.limits
    }

    /// The filter in effect for the current session.
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Starts a new session matching anything, discarding any scan in
    /// progress.
    ///
    /// Until the first [`Self::scan_with`] call, the filter may still be
    /// seeded from that call's argument.
    pub fn begin(&mut self) {
        self.start(ScanFilter::any(), false);
    }

    /// Starts a new session with `filter`, discarding any scan in progress.
    pub fn begin_filtered(&mut self, filter: ScanFilter) {
        self.start(filter, true);
    }

    fn start(&mut self, filter: ScanFilter, seeded: bool) {
        tracing::debug!(?filter, "starting pci scan");
        self.filter = filter;
        self.seeded = seeded;
        self.cursor = Cursor {
            function: self.first_function(),
            ..Cursor::default()
        };
    }

    fn first_function(&self) -> u8 {
        self.filter.function.unwrap_or(0)
    }

    /// Like [`Self::scan`], but on the first call of a session started with
    /// [`Self::begin`], a non-wildcard `seed` becomes the session's filter.
    /// Later calls ignore `seed`.
    pub fn scan_with<A: ConfigAccess + ?Sized>(
        &mut self,
        io: &mut A,
        seed: &ScanFilter,
    ) -> Option<DeviceInfo> {
        if !self.seeded && self.filter.is_wildcard() && !seed.is_wildcard() {
            tracing::debug!(filter = ?seed, "adopting filter from first scan");
            self.filter = *seed;
            // nothing has been scanned yet, so the cursor is still at the start
            self.cursor.function = self.first_function();
        }
        self.scan(io)
    }

    /// Returns the next matching BAR, or `None` once the walk is exhausted.
    ///
    /// After exhaustion every call returns `None` until the next `begin`.
    pub fn scan<A: ConfigAccess + ?Sized>(&mut self, io: &mut A) -> Option<DeviceInfo> {
        self.seeded = true;

        while self.cursor.bus < self.limits.buses {
            while self.cursor.device < self.limits.devices {
                if let Some(info) = self.scan_device(io) {
                    return Some(info);
                }
                self.cursor.device += 1;
                self.cursor.function = self.first_function();
                self.cursor.bar = 0;
            }
            self.cursor.device = 0;
            self.cursor.bus += 1;
        }

        None
    }

    /// Iterates over the remaining matches of the current session.
    pub fn matches<'a, A: ConfigAccess + ?Sized>(
        &'a mut self,
        io: &'a mut A,
    ) -> impl Iterator<Item = DeviceInfo> + 'a {
        std::iter::from_fn(move || self.scan(io))
    }

    fn scan_device<A: ConfigAccess + ?Sized>(&mut self, io: &mut A) -> Option<DeviceInfo> {
        let controller = self.limits.controller;
        // bounded by `ScanLimits::validate`
        let slot = ConfigAddress::from_parts(self.cursor.bus as u8, self.cursor.device, 0, 0);

        if io.read(controller, slot, AccessWidth::Dword) == cfg_space::ABSENT {
            tracing::trace!(%slot, "no device");
            return None;
        }

        while self.cursor.function < self.limits.functions {
            if self
                .filter
                .function
                .is_some_and(|function| function != self.cursor.function)
            {
                return None;
            }

            let address = slot.with_function(self.cursor.function);
            if self.cursor.function != 0
                && io.read(controller, address, AccessWidth::Dword) == cfg_space::ABSENT
            {
                self.next_function();
                continue;
            }

            let header = io.read_header(controller, address);
            if self.filter.matches_header(&header) {
                if let Some(info) = self.scan_bars(io, address, &header) {
                    return Some(info);
                }
            } else {
                tracing::trace!(
                    %address,
                    class = header.class.0,
                    vendor_id = header.vendor_id,
                    device_id = header.device_id,
                    "filtered out"
                );
            }
            self.next_function();
        }

        None
    }

    fn next_function(&mut self) {
        self.cursor.function += 1;
        self.cursor.bar = 0;
    }

    fn scan_bars<A: ConfigAccess + ?Sized>(
        &mut self,
        io: &mut A,
        address: ConfigAddress,
        header: &FunctionHeader,
    ) -> Option<DeviceInfo> {
        let bar_count = header.header_type.bar_count();

        while self.cursor.bar < bar_count {
            let index = self.cursor.bar;
            let Some(probe) =
                bar::probe_bar(io, self.limits.controller, address, index, bar_count)
            else {
                self.cursor.bar += 1;
                continue;
            };

            // the upper half of a 64-bit BAR is not a BAR of its own
            self.cursor.bar += if index + 1 < bar_count {
                probe.width.slots()
            } else {
                1
            };

            if self.filter.bar.is_some_and(|bar| bar != index) {
                continue;
            }

            // resume at the next function once this one's BARs are used up
            if self.cursor.bar >= bar_count {
                self.next_function();
            }

            let info = DeviceInfo {
                bus: address.bus(),
                device: address.device(),
                function: address.function(),
                vendor_id: header.vendor_id,
                device_id: header.device_id,
                class: header.class,
                irq: self.irq_mapper.pin_to_irq(header.interrupt_pin),
                bar: index,
                space: probe.space,
                width: probe.width,
                prefetchable: probe.prefetchable,
                address: probe.address,
                size: probe.size,
            };
            tracing::debug!(%info, "pci match");
            return Some(info);
        }

        None
    }
}
