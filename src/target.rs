//! The halted-target view consumed by a debugger front-end.
//!
//! A [`Target`] is what a GDB remote stub talks to: register file bytes,
//! memory, breakpoints and run control. The byte layout of the register
//! file matches [`TARGET_DESCRIPTION_XML`] exactly.

use std::time::Duration;

use crate::Error;

/// Stop signal reported by [`Target::halt_wait`], numbered like the POSIX
/// signals GDB expects in its stop replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    /// Halted on debugger request.
    Interrupt = 2,
    /// Halted by a breakpoint, step or other debug event.
    Trap = 5,
    /// The probe lost contact with the target.
    Lost = 29,
}

impl Signal {
    /// The numeric signal value for the remote protocol stop reply.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Width of a hardware breakpoint: a Thumb half-word or an ARM word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakpointSize {
    /// 16-bit Thumb instruction.
    Halfword = 2,
    /// 32-bit ARM instruction.
    Word = 4,
}

impl BreakpointSize {
    /// Parse the length field of a GDB `Z0`/`z0` style request.
    pub fn from_len(len: u8) -> Option<Self> {
        match len {
            2 => Some(BreakpointSize::Halfword),
            4 => Some(BreakpointSize::Word),
            _ => None,
        }
    }
}

/// Snapshot of the architectural register file of a halted core.
///
/// `r[15]` holds the instruction address the core will resume from, with
/// the pipeline offset already removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoreRegisters {
    /// r0..r12, sp (r13), lr (r14), pc (r15).
    pub r: [u32; 16],
    /// Current Program Status Register.
    pub cpsr: u32,
    /// VFP status and control.
    pub fpscr: u32,
    /// VFP double-precision registers d0..d15.
    pub d: [u64; 16],
}

impl CoreRegisters {
    /// Serialized size of the register file in bytes.
    pub const SIZE: usize = 16 * 4 + 4 + 4 + 16 * 8;

    /// Thumb state bit in the CPSR.
    pub const CPSR_THUMB: u32 = 1 << 5;

    /// Whether the snapshot was taken in Thumb state.
    pub fn is_thumb(&self) -> bool {
        self.cpsr & Self::CPSR_THUMB != 0
    }

    /// Serialize into the GDB `g`-packet byte layout: sixteen 32-bit core
    /// registers, cpsr, fpscr, then sixteen 64-bit d-registers, all
    /// little-endian and packed.
    pub fn write_bytes(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);

        let mut offset = 0;
        let mut put = |bytes: &[u8]| {
            buf[offset..offset + bytes.len()].copy_from_slice(bytes);
            offset += bytes.len();
        };

        for reg in self.r.iter() {
            put(&reg.to_le_bytes());
        }
        put(&self.cpsr.to_le_bytes());
        put(&self.fpscr.to_le_bytes());
        for reg in self.d.iter() {
            put(&reg.to_le_bytes());
        }
    }

    /// Deserialize from the layout produced by [`CoreRegisters::write_bytes`].
    pub fn read_bytes(&mut self, data: &[u8]) {
        assert_eq!(data.len(), Self::SIZE);

        let word = |i: usize| u32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());

        for i in 0..16 {
            self.r[i] = word(i);
        }
        self.cpsr = word(16);
        self.fpscr = word(17);
        for i in 0..16 {
            let low = word(18 + 2 * i) as u64;
            let high = word(19 + 2 * i) as u64;
            self.d[i] = (high << 32) | low;
        }
    }
}

/// GDB target description for an ARMv7-A core with VFP.
pub const TARGET_DESCRIPTION_XML: &str = concat!(
    r#"<?xml version="1.0"?>"#,
    r#"<!DOCTYPE feature SYSTEM "gdb-target.dtd">"#,
    "<target>",
    "  <architecture>arm</architecture>",
    r#"  <feature name="org.gnu.gdb.arm.core">"#,
    r#"    <reg name="r0" bitsize="32"/>"#,
    r#"    <reg name="r1" bitsize="32"/>"#,
    r#"    <reg name="r2" bitsize="32"/>"#,
    r#"    <reg name="r3" bitsize="32"/>"#,
    r#"    <reg name="r4" bitsize="32"/>"#,
    r#"    <reg name="r5" bitsize="32"/>"#,
    r#"    <reg name="r6" bitsize="32"/>"#,
    r#"    <reg name="r7" bitsize="32"/>"#,
    r#"    <reg name="r8" bitsize="32"/>"#,
    r#"    <reg name="r9" bitsize="32"/>"#,
    r#"    <reg name="r10" bitsize="32"/>"#,
    r#"    <reg name="r11" bitsize="32"/>"#,
    r#"    <reg name="r12" bitsize="32"/>"#,
    r#"    <reg name="sp" bitsize="32" type="data_ptr"/>"#,
    r#"    <reg name="lr" bitsize="32" type="code_ptr"/>"#,
    r#"    <reg name="pc" bitsize="32" type="code_ptr"/>"#,
    r#"    <reg name="cpsr" bitsize="32"/>"#,
    "  </feature>",
    r#"  <feature name="org.gnu.gdb.arm.vfp">"#,
    r#"    <reg name="fpscr" bitsize="32"/>"#,
    r#"    <reg name="d0" bitsize="64" type="float"/>"#,
    r#"    <reg name="d1" bitsize="64" type="float"/>"#,
    r#"    <reg name="d2" bitsize="64" type="float"/>"#,
    r#"    <reg name="d3" bitsize="64" type="float"/>"#,
    r#"    <reg name="d4" bitsize="64" type="float"/>"#,
    r#"    <reg name="d5" bitsize="64" type="float"/>"#,
    r#"    <reg name="d6" bitsize="64" type="float"/>"#,
    r#"    <reg name="d7" bitsize="64" type="float"/>"#,
    r#"    <reg name="d8" bitsize="64" type="float"/>"#,
    r#"    <reg name="d9" bitsize="64" type="float"/>"#,
    r#"    <reg name="d10" bitsize="64" type="float"/>"#,
    r#"    <reg name="d11" bitsize="64" type="float"/>"#,
    r#"    <reg name="d12" bitsize="64" type="float"/>"#,
    r#"    <reg name="d13" bitsize="64" type="float"/>"#,
    r#"    <reg name="d14" bitsize="64" type="float"/>"#,
    r#"    <reg name="d15" bitsize="64" type="float"/>"#,
    "  </feature>",
    "</target>",
);

/// Abstract interface to a debuggable core, consumed by the remote
/// protocol front-end.
pub trait Target {
    /// Human-readable driver name.
    fn driver_name(&self) -> &'static str;

    /// GDB target description XML for this core.
    fn target_description_xml(&self) -> &'static str;

    /// Arm debug mode and halt the core. On success the core is halted and
    /// the register cache is valid.
    fn attach(&mut self) -> Result<(), Error>;

    /// Restore clobbered state, disable debug mode and let the core run.
    fn detach(&mut self) -> Result<(), Error>;

    /// Whether a debugger-induced fault occurred since the last call.
    /// Clears the sticky fault state as a side effect.
    fn check_error(&mut self) -> bool;

    /// Read `dest.len()` bytes of target memory at virtual address `src`.
    fn mem_read(&mut self, dest: &mut [u8], src: u32) -> Result<(), Error>;

    /// Write `src` to target memory at virtual address `dest`.
    fn mem_write(&mut self, dest: u32, src: &[u8]) -> Result<(), Error>;

    /// Size in bytes of the serialized register file.
    fn regs_size(&self) -> usize;

    /// Copy the cached register file into `data` (see
    /// [`CoreRegisters::write_bytes`] for the layout). Valid only while
    /// the core is halted.
    fn regs_read(&mut self, data: &mut [u8]);

    /// Update the cached register file from `data`. The cache is flushed
    /// to the core on the next resume or detach.
    fn regs_write(&mut self, data: &[u8]);

    /// Platform-specific system reset, leaving the target re-attached.
    fn reset(&mut self) -> Result<(), Error>;

    /// Ask the core to halt. Asynchronous; poll with [`Target::halt_wait`].
    fn halt_request(&mut self) -> Result<(), Error>;

    /// Poll for a halt. `Ok(None)` means the core is still running.
    fn halt_wait(&mut self) -> Result<Option<Signal>, Error>;

    /// Resume the core, single-stepping one instruction if `step`.
    fn halt_resume(&mut self, step: bool) -> Result<(), Error>;

    /// Arm a hardware breakpoint comparator at `addr`.
    fn set_hw_breakpoint(&mut self, addr: u32, size: BreakpointSize) -> Result<(), Error>;

    /// Disarm the hardware breakpoint at `addr`.
    fn clear_hw_breakpoint(&mut self, addr: u32, size: BreakpointSize) -> Result<(), Error>;
}

/// Board-level facilities the driver borrows from the probe platform: the
/// system reset line and a blocking delay.
pub trait Platform {
    /// Drive the system reset line.
    fn srst_set_val(&mut self, assert: bool);

    /// Current state of the system reset line.
    fn srst_get_val(&self) -> bool;

    /// Block for the given duration.
    fn delay(&mut self, duration: Duration);
}

/// Out-of-band events the driver reports to its host: console output for
/// the user and loss of the target.
pub trait EventSink {
    /// Send an informational message to the debugger console.
    fn message(&mut self, msg: &str);

    /// Flash a morse message on the probe's status LED.
    fn morse(&mut self, msg: &str, repeat: bool);

    /// The probe has permanently lost contact with the target; the
    /// enclosing session lifecycle should tear the target list down.
    fn target_lost(&mut self);
}
