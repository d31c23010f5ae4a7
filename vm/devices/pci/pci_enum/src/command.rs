// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command register helpers for functions found by a scan.

use crate::ConfigAccess;
use crate::enumerator::DeviceInfo;
use crate::io::AccessWidth;
use crate::spec::cfg_space;
use crate::spec::cfg_space::Command;

/// Reads the command register of the function described by `info`.
pub fn read_command<A: ConfigAccess + ?Sized>(
    io: &mut A,
    controller: u8,
    info: &DeviceInfo,
) -> Command {
    let address = info.config_address(cfg_space::reg::STATUS_COMMAND);
    Command::from_bits(io.read(controller, address, AccessWidth::Word) as u16)
}

fn update_command<A: ConfigAccess + ?Sized>(
    io: &mut A,
    controller: u8,
    info: &DeviceInfo,
    f: impl FnOnce(Command) -> Command,
) {
    let address = info.config_address(cfg_space::reg::STATUS_COMMAND);
    let command = f(read_command(io, controller, info));
    tracing::debug!(%address, command = command.into_bits(), "updating command register");
    io.write(
        controller,
        address,
        AccessWidth::Word,
        command.into_bits().into(),
    );
}

/// Enables memory space decoding for the function described by `info`.
pub fn enable_memory_space<A: ConfigAccess + ?Sized>(
    io: &mut A,
    controller: u8,
    info: &DeviceInfo,
) {
    update_command(io, controller, info, |command| {
        command.with_mmio_enabled(true)
    });
}

/// Enables bus mastering for the function described by `info`.
pub fn enable_bus_master<A: ConfigAccess + ?Sized>(io: &mut A, controller: u8, info: &DeviceInfo) {
    update_command(io, controller, info, |command| command.with_bus_master(true));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Enumerator;
    use crate::ScanLimits;
    use crate::emulated::EmulatedBar;
    use crate::emulated::EmulatedBus;
    use crate::emulated::EmulatedFunction;
    use crate::irq::LinearIrqMapper;
    use crate::spec::hwid::ClassCode;
    use crate::spec::hwid::HardwareIds;

    fn found() -> (EmulatedBus, DeviceInfo) {
        let mut bus = EmulatedBus::new();
        bus.insert(
            0,
            7,
            2,
            EmulatedFunction::new(HardwareIds {
                vendor_id: 0x8086,
                device_id: 0x1234,
                revision_id: 0,
                prog_if: 0,
                sub_class: 0,
                base_class: ClassCode::SIMPLE_COMMUNICATION_CONTROLLER,
            })
            .with_bar(0, EmulatedBar::memory32(0x1000, 0xfe00_0000)),
        );
        bus.insert(
            0,
            7,
            0,
            EmulatedFunction::new(HardwareIds {
                vendor_id: 0x8086,
                device_id: 0x1230,
                revision_id: 0,
                prog_if: 0,
                sub_class: 0,
                base_class: ClassCode::BRIDGE,
            }),
        );

        let mut scan = Enumerator::new(ScanLimits::default(), LinearIrqMapper { base: 0 }).unwrap();
        let info = scan.scan(&mut bus).unwrap();
        (bus, info)
    }

    #[test]
    fn enable_memory_then_master() {
        let (mut bus, info) = found();
        assert_eq!(read_command(&mut bus, 0, &info), Command::new());

        enable_memory_space(&mut bus, 0, &info);
        let command = bus.function(0, 7, 2).unwrap().command();
        assert!(command.mmio_enabled());
        assert!(!command.bus_master());

        enable_bus_master(&mut bus, 0, &info);
        let command = read_command(&mut bus, 0, &info);
        assert!(command.mmio_enabled());
        assert!(command.bus_master());

        // function 0 of the same device is untouched
        assert_eq!(bus.function(0, 7, 0).unwrap().command(), Command::new());
    }

    #[test]
    fn idempotent() {
        let (mut bus, info) = found();
        enable_bus_master(&mut bus, 0, &info);
        enable_bus_master(&mut bus, 0, &info);
        assert_eq!(
            read_command(&mut bus, 0, &info),
            Command::new().with_bus_master(true)
        );
    }
}
