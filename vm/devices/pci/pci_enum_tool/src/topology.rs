// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! JSON description of an emulated PCI topology.

use anyhow::Context;
use anyhow::bail;
use pci_enum::ConfigAddress;
use pci_enum::emulated::EmulatedBar;
use pci_enum::emulated::EmulatedBus;
use pci_enum::emulated::EmulatedFunction;
use pci_enum::spec::cfg_space;
use pci_enum::spec::hwid::ClassCode;
use pci_enum::spec::hwid::HardwareIds;
use serde::Deserialize;
use serde::Deserializer;
use std::path::Path;

/// Parses a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_int(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Accepts either a JSON number or a string understood by [`parse_int`].
fn int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Int(v) => v,
        Raw::Str(s) => parse_int(&s).map_err(D::Error::custom)?,
    };
    T::try_from(value).map_err(|_| D::Error::custom(format!("{value:#x} out of range")))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    #[serde(default)]
    pub controller: u8,
    pub functions: Vec<FunctionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionEntry {
    pub bus: u8,
    pub device: u8,
    #[serde(default)]
    pub function: u8,
    #[serde(deserialize_with = "int")]
    pub vendor_id: u16,
    #[serde(deserialize_with = "int")]
    pub device_id: u16,
    #[serde(deserialize_with = "int")]
    pub class: u8,
    #[serde(default, deserialize_with = "int")]
    pub sub_class: u8,
    #[serde(default, deserialize_with = "int")]
    pub prog_if: u8,
    #[serde(default, deserialize_with = "int")]
    pub revision_id: u8,
    /// Header layout, 1 for a PCI-to-PCI bridge.
    #[serde(default)]
    pub header_type: u8,
    #[serde(default)]
    pub multi_function: bool,
    #[serde(default)]
    pub interrupt_pin: u8,
    #[serde(default)]
    pub bars: Vec<BarEntry>,
}

#[derive(Debug, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    Memory32,
    Memory64,
    Io,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BarEntry {
    pub index: u8,
    pub kind: BarKind,
    #[serde(deserialize_with = "int")]
    pub size: u64,
    #[serde(default, deserialize_with = "int")]
    pub base: u64,
    #[serde(default)]
    pub prefetchable: bool,
}

impl BarEntry {
    fn to_emulated(&self) -> anyhow::Result<EmulatedBar> {
        let last = match self.kind {
            BarKind::Memory64 => cfg_space::TYPE0_BAR_COUNT - 2,
            BarKind::Memory32 | BarKind::Io => cfg_space::TYPE0_BAR_COUNT - 1,
        };
        if self.index > last {
            bail!("{:?} bar index {} out of range (max {last})", self.kind, self.index);
        }
        let max_size: u64 = match self.kind {
            BarKind::Memory64 => 1 << 63,
            BarKind::Memory32 | BarKind::Io => 1 << 31,
        };
        if self.size > max_size {
            bail!("{:?} bar size {:#x} exceeds {max_size:#x}", self.kind, self.size);
        }

        let narrow = |value: u64, what: &str| {
            u32::try_from(value).with_context(|| format!("{what} {value:#x} exceeds 32 bits"))
        };
        let bar = match self.kind {
            BarKind::Memory32 => EmulatedBar::Memory32 {
                size: narrow(self.size, "size")?,
                base: narrow(self.base, "base")?,
                prefetchable: self.prefetchable,
            },
            BarKind::Memory64 => EmulatedBar::Memory64 {
                size: self.size,
                base: self.base,
                prefetchable: self.prefetchable,
            },
            BarKind::Io => EmulatedBar::io(narrow(self.size, "size")?, narrow(self.base, "base")?),
        };
        Ok(bar)
    }
}

impl Topology {
    /// Reads and parses a topology file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs_err::read_to_string(path)?;
        Self::parse(&data).with_context(|| format!("invalid topology {}", path.display()))
    }

    /// Parses a topology from JSON text.
    pub fn parse(data: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Builds the emulated bus the topology describes.
    pub fn build(&self) -> anyhow::Result<EmulatedBus> {
        let mut bus = EmulatedBus::new().with_controller(self.controller);
        for entry in &self.functions {
            let address = ConfigAddress::encode(entry.bus, entry.device, entry.function, 0)
                .context("invalid function address")?;
            if entry.header_type > 0x7F {
                bail!("header type {:#x} of {address} exceeds 7 bits", entry.header_type);
            }

            let mut function = EmulatedFunction::new(HardwareIds {
                vendor_id: entry.vendor_id,
                device_id: entry.device_id,
                revision_id: entry.revision_id,
                prog_if: entry.prog_if,
                sub_class: entry.sub_class,
                base_class: ClassCode(entry.class),
            })
            .with_header_layout(entry.header_type)
            .with_multi_function_bit(entry.multi_function)
            .with_interrupt_pin(entry.interrupt_pin);

            for bar in &entry.bars {
                let emulated = bar
                    .to_emulated()
                    .with_context(|| format!("invalid bar {} of {address}", bar.index))?;
                function = function.with_bar(bar.index, emulated);
            }

            tracing::debug!(%address, "adding emulated function");
            bus.insert(entry.bus, entry.device, entry.function, function);
        }
        Ok(bus)
    }
}
