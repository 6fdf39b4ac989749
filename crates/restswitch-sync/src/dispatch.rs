//! # Register Dispatch
//!
//! Turns decoded masks into calls on the board's register bus.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RegisterMask (outputs) ──► one masked write_register(reg, value, mask) │
//! │  PulseRequest           ──► pulse_register_bit(reg, bit, 250ms) per bit │
//! │                                                                         │
//! │  Pulses are best-effort per bit: a rejected bit is logged and the      │
//! │  remaining bits are still pulsed.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Input-bank masks are decoded but never written here. Whether inputs in
//! the shadow are read-only or cloud-writable is not settled, so they are
//! left alone.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use restswitch_core::{PulseRequest, RegisterId, RegisterMask};

use crate::error::RegisterError;

// =============================================================================
// Register Bus
// =============================================================================

/// Hardware register collaborator. Calls are expected to return quickly;
/// a pulse is timed by the device, not by the caller.
pub trait RegisterBus {
    /// Writes `value` to the lines of `register` selected by `mask`.
    fn write_register(&mut self, register: RegisterId, value: u8, mask: u8)
        -> Result<(), RegisterError>;

    /// Activates one line of `register` for `duration`.
    fn pulse_register_bit(
        &mut self,
        register: RegisterId,
        bit: u8,
        duration: Duration,
    ) -> Result<(), RegisterError>;
}

/// Result of dispatching a pulse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseOutcome {
    pub pulsed: u32,
    pub failed: u32,
}

// =============================================================================
// Dispatch Bridge
// =============================================================================

/// Routes decoded output masks and pulse requests to a [`RegisterBus`].
#[derive(Debug)]
pub struct RegisterDispatch<R> {
    bus: R,
    output_register: RegisterId,
    pulse_duration: Duration,
}

impl<R: RegisterBus> RegisterDispatch<R> {
    pub fn new(bus: R, output_register: RegisterId, pulse_duration: Duration) -> Self {
        RegisterDispatch {
            bus,
            output_register,
            pulse_duration,
        }
    }

    /// Applies the output mask as a single masked write.
    ///
    /// Returns `Ok(false)` without touching the bus when no line is addressed.
    pub fn apply_outputs(&mut self, outputs: &RegisterMask) -> Result<bool, RegisterError> {
        if outputs.is_empty() {
            debug!("No output lines addressed, skipping write");
            return Ok(false);
        }

        debug!(
            register = %self.output_register,
            value = format_args!("{:#04x}", outputs.value),
            mask = format_args!("{:#04x}", outputs.mask),
            "Writing outputs"
        );
        self.bus
            .write_register(self.output_register, outputs.value, outputs.mask)?;
        Ok(true)
    }

    /// Pulses every requested line once, continuing past failures.
    pub fn pulse(&mut self, request: PulseRequest) -> PulseOutcome {
        let mut outcome = PulseOutcome::default();

        for bit in request.iter() {
            match self
                .bus
                .pulse_register_bit(self.output_register, bit, self.pulse_duration)
            {
                Ok(()) => {
                    debug!(bit, "Pulse sent");
                    outcome.pulsed += 1;
                }
                Err(e) => {
                    warn!(bit, error = %e, "Pulse failed");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    pub fn bus(&self) -> &R {
        &self.bus
    }
}

// =============================================================================
// Simulated Registers
// =============================================================================

/// In-memory register file. Applies masked writes; pulses are only logged.
///
/// Used when the agent runs without a serial bridge.
#[derive(Debug, Default, Clone)]
pub struct SimulatedRegisters {
    registers: BTreeMap<RegisterId, u8>,
}

impl SimulatedRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `register` (0 if never written).
    pub fn value(&self, register: RegisterId) -> u8 {
        self.registers.get(&register).copied().unwrap_or(0)
    }
}

impl RegisterBus for SimulatedRegisters {
    fn write_register(
        &mut self,
        register: RegisterId,
        value: u8,
        mask: u8,
    ) -> Result<(), RegisterError> {
        let current = self.registers.entry(register).or_insert(0);
        *current = RegisterMask::new(value, mask).apply_to(*current);
        info!(%register, value = format_args!("{:#010b}", *current), "Register written");
        Ok(())
    }

    fn pulse_register_bit(
        &mut self,
        register: RegisterId,
        bit: u8,
        duration: Duration,
    ) -> Result<(), RegisterError> {
        info!(%register, bit, ?duration, "Register bit pulsed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bus that records pulses and rejects them on selected bits.
    #[derive(Default)]
    struct FlakyBus {
        inner: SimulatedRegisters,
        reject_bits: u8,
        writes: u32,
        pulses: Vec<(RegisterId, u8)>,
    }

    impl RegisterBus for FlakyBus {
        fn write_register(
            &mut self,
            register: RegisterId,
            value: u8,
            mask: u8,
        ) -> Result<(), RegisterError> {
            self.writes += 1;
            self.inner.write_register(register, value, mask)
        }

        fn pulse_register_bit(
            &mut self,
            register: RegisterId,
            bit: u8,
            duration: Duration,
        ) -> Result<(), RegisterError> {
            if self.reject_bits & (1 << bit) != 0 {
                return Err(RegisterError::PulseRejected { register, bit });
            }
            self.pulses.push((register, bit));
            self.inner.pulse_register_bit(register, bit, duration)
        }
    }

    fn dispatch(bus: FlakyBus) -> RegisterDispatch<FlakyBus> {
        RegisterDispatch::new(bus, RegisterId::OUTPUT_1, Duration::from_millis(250))
    }

    #[test]
    fn test_single_masked_write() {
        let mut d = dispatch(FlakyBus::default());
        assert!(d.apply_outputs(&RegisterMask::new(0b0000_1110, 0b0000_1110)).unwrap());
        assert!(d.apply_outputs(&RegisterMask::new(0, 0b0000_0100)).unwrap());

        assert_eq!(d.bus().writes, 2);
        assert_eq!(d.bus().inner.value(RegisterId::OUTPUT_1), 0b0000_1010);
    }

    #[test]
    fn test_empty_mask_skips_write() {
        let mut d = dispatch(FlakyBus::default());
        assert!(!d.apply_outputs(&RegisterMask::EMPTY).unwrap());
        assert_eq!(d.bus().writes, 0);
    }

    #[test]
    fn test_simulated_pulse_leaves_registers() {
        let mut regs = SimulatedRegisters::new();
        regs.write_register(RegisterId::OUTPUT_1, 0b0000_0100, 0b0000_0100)
            .unwrap();
        for _ in 0..3 {
            regs.pulse_register_bit(RegisterId::OUTPUT_1, 1, Duration::from_millis(250))
                .unwrap();
        }
        assert_eq!(regs.value(RegisterId::OUTPUT_1), 0b0000_0100);
    }

    #[test]
    fn test_pulses_are_independent() {
        let mut d = dispatch(FlakyBus {
            reject_bits: 0b0000_0010,
            ..Default::default()
        });
        let outcome = d.pulse(PulseRequest::from_bits(0b0000_1010));

        assert_eq!(outcome, PulseOutcome { pulsed: 1, failed: 1 });
        assert_eq!(d.bus().pulses, vec![(RegisterId::OUTPUT_1, 3)]);
    }
}
