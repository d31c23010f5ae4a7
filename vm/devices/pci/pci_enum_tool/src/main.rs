// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enumerates an emulated PCI topology described by a JSON file.

mod topology;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use pci_enum::Enumerator;
use pci_enum::ScanFilter;
use pci_enum::ScanLimits;
use pci_enum::command;
use pci_enum::irq::LinearIrqMapper;
use pci_enum::spec::hwid::ClassCode;
use std::io::Write;
use std::path::PathBuf;
use topology::Topology;
use topology::parse_int;
use tracing_subscriber::EnvFilter;

fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_int(s).map_err(|e| e.to_string())?;
    u8::try_from(v).map_err(|_| format!("{v:#x} does not fit in 8 bits"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let v = parse_int(s).map_err(|e| e.to_string())?;
    u16::try_from(v).map_err(|_| format!("{v:#x} does not fit in 16 bits"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_int(s).map_err(|e| e.to_string())?;
    u32::try_from(v).map_err(|_| format!("{v:#x} does not fit in 32 bits"))
}

#[derive(Parser, Debug)]
#[command(name = "pci_enum_tool", about = "Scan an emulated PCI topology", version)]
struct Cli {
    /// JSON file describing the emulated functions
    #[arg(long)]
    topology: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,

    /// Number of buses to walk, starting at bus 0
    #[arg(long, default_value_t = 1)]
    buses: u16,

    /// IRQ routed to INTA#; INTB#-INTD# follow consecutively
    #[arg(long, value_parser = parse_u32, default_value = "16")]
    irq_base: u32,

    /// Hand the filter to the first scan call instead of starting a filtered
    /// session
    #[arg(long)]
    seed: bool,

    /// Enable memory space decoding on every match
    #[arg(long)]
    enable_memory: bool,

    /// Enable bus mastering on every match
    #[arg(long)]
    enable_master: bool,

    /// Log scan progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Base class to match
    #[arg(long, value_parser = parse_u8)]
    class: Option<u8>,

    /// Vendor ID to match, together with --device
    #[arg(long, value_parser = parse_u16, requires = "device")]
    vendor: Option<u16>,

    /// Device ID to match, together with --vendor
    #[arg(long, value_parser = parse_u16, requires = "vendor")]
    device: Option<u16>,

    /// Function number to match
    #[arg(long, value_parser = parse_u8)]
    function: Option<u8>,

    /// BAR index to match
    #[arg(long, value_parser = parse_u8)]
    bar: Option<u8>,
}

impl FilterArgs {
    fn to_filter(&self) -> ScanFilter {
        let mut filter = ScanFilter::any();
        if let Some(class) = self.class {
            filter = filter.with_class(ClassCode(class));
        }
        if let (Some(vendor), Some(device)) = (self.vendor, self.device) {
            filter = filter.with_ids(vendor, device);
        }
        if let Some(function) = self.function {
            filter = filter.with_function(function);
        }
        if let Some(bar) = self.bar {
            filter = filter.with_bar(bar);
        }
        filter
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Scans the topology and writes one line per match. Returns the number of
/// matches.
fn run(cli: &Cli, out: &mut impl Write) -> anyhow::Result<usize> {
    let topology = Topology::load(&cli.topology)?;
    let mut bus = topology.build()?;

    let limits = ScanLimits {
        buses: cli.buses,
        controller: topology.controller,
        ..ScanLimits::default()
    };
    let mut scan = Enumerator::new(limits, LinearIrqMapper { base: cli.irq_base })
        .context("invalid scan limits")?;

    let filter = cli.filter.to_filter();
    if cli.seed {
        scan.begin();
    } else {
        scan.begin_filtered(filter);
    }

    let mut found = 0;
    // a filtered session ignores the seed
    while let Some(info) = scan.scan_with(&mut bus, &filter) {
        writeln!(out, "{info}")?;
        if cli.enable_memory {
            command::enable_memory_space(&mut bus, limits.controller, &info);
        }
        if cli.enable_master {
            command::enable_bus_master(&mut bus, limits.controller, &info);
        }
        found += 1;
    }

    tracing::info!(found, "scan complete");
    Ok(found)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut stdout = std::io::stdout().lock();
    match run(&cli, &mut stdout) {
        Ok(0) => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"{
        "functions": [
            { "bus": 0, "device": 0, "vendor_id": "0x8086", "device_id": "0x29c0", "class": 6 },
            {
                "bus": 0, "device": 2, "vendor_id": "0x8086", "device_id": "0x100e", "class": 2,
                "interrupt_pin": 1,
                "bars": [
                    { "index": 0, "kind": "memory32", "size": "0x20000", "base": "0xfebc0000" },
                    { "index": 1, "kind": "io", "size": "0x40", "base": "0xc000" }
                ]
            },
            {
                "bus": 0, "device": 4, "vendor_id": "0x1af4", "device_id": "0x1000", "class": 2,
                "bars": [
                    { "index": 4, "kind": "memory64", "size": "0x4000", "base": "0xfe000000",
                      "prefetchable": true }
                ]
            }
        ]
    }"#;

    fn run_with(args: &[&str]) -> (usize, String) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOPOLOGY.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let mut argv = vec!["pci_enum_tool", "--topology", &path];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();

        let mut out = Vec::new();
        let found = run(&cli, &mut out).unwrap();
        (found, String::from_utf8(out).unwrap())
    }

    #[test]
    fn lists_every_bar() {
        let (found, out) = run_with(&[]);
        assert_eq!(found, 3);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "00:02.0 8086:100e class 0x02 bar 0 MEM 0xfebc0000-0xfebdffff irq 16",
                "00:02.0 8086:100e class 0x02 bar 1 I/O 0xc000-0xc03f irq 16",
                "00:04.0 1af4:1000 class 0x02 bar 4 MEM 0xfe000000-0xfe003fff irq none",
            ]
        );
    }

    #[test]
    fn filters() {
        let (found, out) = run_with(&["--vendor", "0x1af4", "--device", "0x1000"]);
        assert_eq!(found, 1);
        assert!(out.starts_with("00:04.0 1af4:1000"));

        let (found, _) = run_with(&["--class", "2", "--bar", "1"]);
        assert_eq!(found, 1);

        let (found, _) = run_with(&["--class", "0x0c"]);
        assert_eq!(found, 0);
    }

    #[test]
    fn seeded_session() {
        let (found, out) = run_with(&["--seed", "--vendor", "0x8086", "--device", "0x100e"]);
        assert_eq!(found, 2);
        assert!(out.lines().all(|line| line.contains("8086:100e")));
    }

    #[test]
    fn lone_vendor_rejected() {
        assert!(
            Cli::try_parse_from(["pci_enum_tool", "--topology", "x.json", "--vendor", "1"])
                .is_err()
        );
    }

    #[test]
    fn missing_topology_file() {
        let cli = Cli::try_parse_from(["pci_enum_tool", "--topology", "/nonexistent/t.json"])
            .unwrap();
        let err = run(&cli, &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/t.json"));
    }
}
