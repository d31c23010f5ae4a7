// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Legacy interrupt pin routing.

/// Platform mapping from a function's interrupt pin register to the IRQ
/// number it raises.
pub trait IrqMapper {
    /// Maps `pin` (0 = none, 1-4 = INTA#-INTD#) to an IRQ number.
    fn pin_to_irq(&self, pin: u8) -> Option<u32>;
}

impl<F: Fn(u8) -> Option<u32>> IrqMapper for F {
    fn pin_to_irq(&self, pin: u8) -> Option<u32> {
        self(pin)
    }
}

/// Routes INTA#-INTD# to four consecutive IRQs starting at `base`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LinearIrqMapper {
    /// IRQ raised by INTA#
    pub base: u32,
}

impl IrqMapper for LinearIrqMapper {
    fn pin_to_irq(&self, pin: u8) -> Option<u32> {
        match pin {
            1..=4 => Some(self.base + u32::from(pin) - 1),
            _ => None,
        }
    }
}
