// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resumable, criteria-driven PCI enumeration.
//!
//! Start a session with [`Enumerator::begin_filtered`], then call
//! [`Enumerator::scan`] until it returns `None`. Every call yields one
//! implemented BAR of a function matching the [`ScanFilter`], along with the
//! function's identification and the BAR's probed address and size.
//!
//! Configuration space is reached through a caller-supplied
//! [`ConfigAccess`] channel. [`emulated::EmulatedBus`] implements it in memory.

#![forbid(unsafe_code)]

mod address;
pub mod bar;
pub mod command;
pub mod emulated;
mod enumerator;
mod io;
pub mod irq;
pub mod spec;

pub use address::AddressError;
pub use address::ConfigAddress;
pub use address::MAX_DEVICES;
pub use address::MAX_FUNCTIONS;
pub use enumerator::DeviceInfo;
pub use enumerator::Enumerator;
pub use enumerator::LimitsError;
pub use enumerator::ScanFilter;
pub use enumerator::ScanLimits;
pub use io::AccessWidth;
pub use io::ConfigAccess;
pub use io::FunctionHeader;
pub use io::RegisterProbe;
pub use io::SharedConfigAccess;
