//! Target-side driver for debugging ARMv7-A (Cortex-A class) application
//! processors through their external debug interface.
//!
//! The driver speaks to a core's memory-mapped debug register block over
//! an ADIv5 APB access port and exposes the abstract halted-target view a
//! GDB remote stub consumes: register file, memory, hardware breakpoints,
//! halt/resume/step and reset. The non-obvious machinery lives in
//! [`armv7a`]: executing instructions on the halted core through the ITR,
//! marshalling operands over the Debug Communication Channel, keeping
//! caches coherent around debugger memory accesses, translating virtual
//! addresses through the MMU, and building single-step out of an
//! instruction-address mismatch comparator.
//!
//! The crate is built around a handful of seams:
//!
//! - [`DapAccess`](adiv5::DapAccess) - the ADIv5 transport underneath.
//! - [`Platform`](target::Platform) - reset line and delays of the probe
//!   hardware.
//! - [`EventSink`](target::EventSink) - console output and lifecycle
//!   notifications towards the host.
//! - [`Target`](target::Target) - the interface exposed upwards to the
//!   remote protocol front-end.
//! - [`ResetSequence`](sequences::ResetSequence) - device-specific reset,
//!   with the Zynq-7000 dance built in.

pub mod adiv5;
pub mod armv7a;
pub mod memory_mapped_registers;
pub mod sequences;
pub mod target;

pub use adiv5::{AccessPort, ArmError, DapAccess, DapError, LowAccess};
pub use armv7a::{CortexA, DRIVER_NAME};
pub use memory_mapped_registers::MemoryMappedRegister;
pub use sequences::{ResetSequence, Zynq7000};
pub use target::{
    BreakpointSize, CoreRegisters, EventSink, Platform, Signal, Target, TARGET_DESCRIPTION_XML,
};

/// Errors surfaced to the debugger front-end.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An ARM debug-layer or transport error.
    #[error(transparent)]
    Arm(#[from] ArmError),

    /// Every hardware breakpoint comparator is already in use.
    #[error("No hardware breakpoint comparator is free.")]
    NoBreakpointSlot,

    /// No armed comparator matches the address being cleared.
    #[error("No hardware breakpoint is set at {addr:#010x}.")]
    UnknownBreakpoint {
        /// The address the front-end asked to clear.
        addr: u32,
    },
}
