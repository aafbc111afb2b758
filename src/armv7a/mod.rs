//! Debug-state-machine driver for ARMv7-A application cores.
//!
//! The driver reaches the core's debug register block through an APB
//! access port and coerces the core in and out of debug state. While
//! halted, single instructions are executed through the Instruction
//! Transfer Register and operands are shuttled over the Debug
//! Communication Channel, which is how registers and (absent a system-bus
//! AP) memory are moved between probe and target.

pub mod debug_regs;
pub(crate) mod instructions;

use std::sync::Arc;
use std::time::Duration;

use crate::adiv5::{
    AccessPort, ArmError, DapAccess, LowAccess, AP_CSW, AP_DRW, AP_TAR, CSW_SIZE_MASK,
    CSW_SIZE_WORD, DP_RDBUFF,
};
use crate::memory_mapped_registers::MemoryMappedRegister;
use crate::sequences::{ResetSequence, Zynq7000};
use crate::target::{
    BreakpointSize, CoreRegisters, EventSink, Platform, Signal, Target, TARGET_DESCRIPTION_XML,
};
use crate::Error;

use debug_regs::{DccMode, Dbgbcr, Dbgbvr, Dbgdidr, Dbgdrcr, Dbgdscr, Dbgdtrrx, Dbgdtrtx, Dbgitr, HaltReason};
use instructions::{
    build_ats1cpr, build_dccimvac, build_dccmvac, build_iciallu, build_ldc, build_mcr, build_mov,
    build_mrc, build_mrs, build_msr, build_read_par, build_stc, build_strb_postinc,
    build_vmov_from_dreg, build_vmov_to_dreg, build_vmrs, build_vmsr,
};

/// Driver name reported to the upper layers.
pub const DRIVER_NAME: &str = "ARM Cortex-A";

/// Cache line length used for maintenance walks. From the Cortex-A9 TRM;
/// may differ on other cores.
const CACHE_LINE_BYTES: u32 = 32;

/// Upper bound on comparator pairs an ARMv7-A core can implement.
const MAX_BREAKPOINTS: usize = 16;

const HALT_POLL_TRIES: u32 = 10;
const HALT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Compute the BCR byte-address-select field for a breakpoint. A word
/// breakpoint matches any byte of the word; a half-word breakpoint matches
/// only its own half, so a mismatch comparator does not re-fire on the
/// neighbouring Thumb instruction.
fn bp_bas(addr: u32, size: BreakpointSize) -> u32 {
    match size {
        BreakpointSize::Word => 0b1111,
        BreakpointSize::Halfword if addr & 2 != 0 => 0b1100,
        BreakpointSize::Halfword => 0b0011,
    }
}

/// A debug session against one ARMv7-A core.
///
/// Created by [`CortexA::probe`]; implements [`Target`] for consumption by
/// a remote protocol front-end. All operations are synchronous and must
/// not be interleaved with other users of the same debug port.
pub struct CortexA {
    dap: Box<dyn DapAccess>,
    platform: Box<dyn Platform>,
    events: Box<dyn EventSink>,
    sequence: Arc<dyn ResetSequence>,

    debug_base: u32,
    apb: AccessPort,
    ahb: Option<AccessPort>,

    reg_cache: CoreRegisters,

    hw_breakpoint_max: usize,
    /// Soft allocation table: bit 0 flags the slot in use, the remaining
    /// bits hold the armed address.
    hw_breakpoint: [u32; MAX_BREAKPOINTS],
    /// Saved control value of comparator 0, which doubles as the
    /// single-step mismatch comparator.
    bpc0: u32,
    /// Sticky debugger-induced MMU/data-abort fault, consumed by
    /// [`CortexA::check_error`].
    mmu_fault: bool,
}

impl CortexA {
    /// Probe the debug block at `debug_base` behind `apb` and build a
    /// session for it. A companion system-bus AP is looked for at AP
    /// index 0.
    pub fn probe(
        dap: Box<dyn DapAccess>,
        platform: Box<dyn Platform>,
        events: Box<dyn EventSink>,
        apb: AccessPort,
        debug_base: u32,
    ) -> Result<Self, ArmError> {
        Self::probe_with_ahb(dap, platform, events, apb, debug_base, 0)
    }

    /// Like [`CortexA::probe`], with the AP index to scan for the
    /// system-bus AP supplied by the caller. Which index carries the
    /// AHB-AP is device specific.
    pub fn probe_with_ahb(
        mut dap: Box<dyn DapAccess>,
        platform: Box<dyn Platform>,
        events: Box<dyn EventSink>,
        apb: AccessPort,
        debug_base: u32,
        ahb_index: u8,
    ) -> Result<Self, ArmError> {
        tracing::debug!("Probing ARMv7-A debug block at {:#010x}", debug_base);

        let candidate = AccessPort::discover(&mut *dap, ahb_index)?;
        let ahb = if candidate.is_ahb() {
            tracing::debug!(
                "AHB-AP at index {} (IDR = {:#010x}), memory goes over the system bus",
                candidate.index,
                candidate.idr
            );
            Some(candidate)
        } else {
            tracing::debug!(
                "No AHB-AP at index {}, memory goes through instruction injection",
                ahb_index
            );
            None
        };

        // Set up the APB CSW for word transfers. It is not touched again.
        let csw = dap.ap_read(apb.index, AP_CSW)?;
        dap.ap_write(apb.index, AP_CSW, (csw & !CSW_SIZE_MASK) | CSW_SIZE_WORD)?;

        let mut target = Self {
            dap,
            platform,
            events,
            sequence: Zynq7000::create(),
            debug_base,
            apb,
            ahb,
            reg_cache: CoreRegisters::default(),
            hw_breakpoint_max: 0,
            hw_breakpoint: [0; MAX_BREAKPOINTS],
            bpc0: 0,
            mmu_fault: false,
        };

        let didr: Dbgdidr = target.read_debug_reg()?;
        target.hw_breakpoint_max = didr.breakpoint_count();
        tracing::debug!("Target has {} breakpoints", target.hw_breakpoint_max);

        Ok(target)
    }

    /// Replace the platform reset sequence (the default is the
    /// Zynq-7000 dance).
    pub fn set_reset_sequence(&mut self, sequence: Arc<dyn ResetSequence>) {
        self.sequence = sequence;
    }

    /// Whether memory accesses go over a system-bus AP rather than
    /// through instruction injection.
    pub fn has_system_bus_access(&self) -> bool {
        self.ahb.is_some()
    }

    /// Number of hardware breakpoint comparators the core advertises.
    pub fn breakpoint_count(&self) -> usize {
        self.hw_breakpoint_max
    }

    /// The cached register file. Valid while the core is halted.
    pub fn core_registers(&self) -> &CoreRegisters {
        &self.reg_cache
    }

    /// Mutable access to the cached register file. Changes reach the core
    /// on the next resume or detach.
    pub fn core_registers_mut(&mut self) -> &mut CoreRegisters {
        &mut self.reg_cache
    }

    pub(crate) fn platform_mut(&mut self) -> &mut dyn Platform {
        &mut *self.platform
    }

    /// One word written to the debug block: TAR selects the register, the
    /// value goes out through a posted DRW access.
    fn apb_write(&mut self, addr: u32, value: u32) -> Result<(), ArmError> {
        self.dap.ap_write(self.apb.index, AP_TAR, addr)?;
        self.dap.dp_low_access(LowAccess::Write, AP_DRW, value)?;
        Ok(())
    }

    /// One word read from the debug block: the posted DRW read is
    /// retrieved through the DP read buffer.
    fn apb_read(&mut self, addr: u32) -> Result<u32, ArmError> {
        self.dap.ap_write(self.apb.index, AP_TAR, addr)?;
        self.dap.dp_low_access(LowAccess::Read, AP_DRW, 0)?;
        self.dap.dp_low_access(LowAccess::Read, DP_RDBUFF, 0)
    }

    fn read_debug_reg<R: MemoryMappedRegister<u32>>(&mut self) -> Result<R, ArmError> {
        let address = R::get_mmio_address_from_base(self.debug_base)?;
        Ok(R::from(self.apb_read(address)?))
    }

    fn write_debug_reg<R: MemoryMappedRegister<u32>>(&mut self, reg: R) -> Result<(), ArmError> {
        let address = R::get_mmio_address_from_base(self.debug_base)?;
        self.apb_write(address, reg.into())
    }

    pub(crate) fn read_didr(&mut self) -> Result<Dbgdidr, ArmError> {
        self.read_debug_reg()
    }

    fn breakpoint_value_address(&self, index: usize) -> Result<u32, ArmError> {
        Ok(Dbgbvr::get_mmio_address_from_base(self.debug_base)? + 4 * index as u32)
    }

    fn breakpoint_control_address(&self, index: usize) -> Result<u32, ArmError> {
        Ok(Dbgbcr::get_mmio_address_from_base(self.debug_base)? + 4 * index as u32)
    }

    /// Execute one instruction on the halted core. Stall-mode DCC provides
    /// the flow control; faults surface later as DBGDSCR.SDABORT_L.
    fn execute_instruction(&mut self, instruction: u32) -> Result<(), ArmError> {
        let address = Dbgitr::get_mmio_address_from_base(self.debug_base)?;
        self.apb_write(address, instruction)
    }

    /// Read `r<regno>` by moving it through the target-to-host DTR.
    fn read_gpreg(&mut self, regno: u16) -> Result<u32, ArmError> {
        self.execute_instruction(build_mcr(14, 0, regno, 0, 5, 0))?;
        let address = Dbgdtrtx::get_mmio_address_from_base(self.debug_base)?;
        self.apb_read(address)
    }

    /// Load `r<regno>` from the host-to-target DTR.
    fn write_gpreg(&mut self, regno: u16, value: u32) -> Result<(), ArmError> {
        let address = Dbgdtrrx::get_mmio_address_from_base(self.debug_base)?;
        self.apb_write(address, value)?;
        self.execute_instruction(build_mrc(14, 0, regno, 0, 5, 0))
    }

    fn clear_sticky_abort(&mut self) -> Result<(), ArmError> {
        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        self.write_debug_reg(drcr)
    }

    /// Pull the whole architectural register file into the cache.
    fn load_register_cache(&mut self) -> Result<(), ArmError> {
        for i in 0..15 {
            self.reg_cache.r[i] = self.read_gpreg(i as u16)?;
        }
        // MCR with Rt = r15 is UNPREDICTABLE; sample the PC through r0.
        self.execute_instruction(build_mov(0, 15))?;
        self.reg_cache.r[15] = self.read_gpreg(0)?;

        self.execute_instruction(build_mrs(0))?;
        self.reg_cache.cpsr = self.read_gpreg(0)?;

        self.execute_instruction(build_vmrs(0))?;
        self.reg_cache.fpscr = self.read_gpreg(0)?;

        for i in 0..16 {
            self.execute_instruction(build_vmov_from_dreg(0, 1, i as u16))?;
            let low = self.read_gpreg(0)? as u64;
            let high = self.read_gpreg(1)? as u64;
            self.reg_cache.d[i] = (high << 32) | low;
        }

        // The PC sampled in debug state is the return address plus the
        // pipeline offset.
        let offset = if self.reg_cache.is_thumb() { 4 } else { 8 };
        self.reg_cache.r[15] = self.reg_cache.r[15].wrapping_sub(offset);

        Ok(())
    }

    /// Write the cached register file back to the core. The d-registers go
    /// first while r0/r1 are still free; the CPSR must be restored before
    /// the PC and the GP registers because the DTR loads clobber it.
    fn flush_register_cache(&mut self) -> Result<(), ArmError> {
        for i in 0..16 {
            self.write_gpreg(1, (self.reg_cache.d[i] >> 32) as u32)?;
            self.write_gpreg(0, self.reg_cache.d[i] as u32)?;
            self.execute_instruction(build_vmov_to_dreg(i as u16, 0, 1))?;
        }

        self.write_gpreg(0, self.reg_cache.fpscr)?;
        self.execute_instruction(build_vmsr(0))?;

        self.write_gpreg(0, self.reg_cache.cpsr)?;
        self.execute_instruction(build_msr(0))?;

        // PC through r0; a direct MRC to r15 would clobber the CPSR.
        self.write_gpreg(0, self.reg_cache.r[15])?;
        self.execute_instruction(build_mov(15, 0))?;

        for i in 0..15 {
            self.write_gpreg(i as u16, self.reg_cache.r[i])?;
        }

        Ok(())
    }

    /// Translate a virtual address through the MMU with a privileged-read
    /// stage 1 lookup. A failed translation sets the sticky fault and
    /// still synthesises a physical address; callers consult
    /// [`CortexA::check_error`].
    fn va_to_pa(&mut self, va: u32) -> Result<u32, ArmError> {
        self.write_gpreg(0, va)?;
        self.execute_instruction(build_ats1cpr(0))?;
        self.execute_instruction(build_read_par(0))?;
        let par = self.read_gpreg(0)?;
        if par & 1 != 0 {
            self.mmu_fault = true;
        }
        let pa = (par & !0xFFF) | (va & 0xFFF);
        tracing::debug!("VA = {:#010x}, PAR = {:#010x}, PA = {:#010x}", va, par, pa);
        Ok(pa)
    }

    /// Walk the cache lines covering `[addr, addr + len)` and run `op`
    /// (a cache maintenance instruction on the address in r0) on each.
    fn cache_maintain(&mut self, addr: u32, len: usize, op: u32) -> Result<(), ArmError> {
        let mut line = (addr & !(CACHE_LINE_BYTES - 1)) as u64;
        let end = addr as u64 + len as u64;
        while line < end {
            self.write_gpreg(0, line as u32)?;
            self.execute_instruction(op)?;
            line += CACHE_LINE_BYTES as u64;
        }
        Ok(())
    }

    /// Read target memory over the system-bus AP. The affected lines are
    /// cleaned first so the read observes what the core sees.
    fn fast_mem_read(&mut self, ahb: AccessPort, dest: &mut [u8], src: u32) -> Result<(), ArmError> {
        self.cache_maintain(src, dest.len(), build_dccmvac(0))?;
        let pa = self.va_to_pa(src)?;
        self.dap.memory_read(ahb.index, dest, pa)
    }

    /// Write target memory over the system-bus AP. The affected lines are
    /// cleaned and invalidated so subsequent fetches observe the write.
    fn fast_mem_write(&mut self, ahb: AccessPort, dest: u32, src: &[u8]) -> Result<(), ArmError> {
        self.cache_maintain(dest, src.len(), build_dccimvac(0))?;
        let pa = self.va_to_pa(dest)?;
        self.dap.memory_write(ahb.index, pa, src)
    }

    /// Read target memory by streaming words through the DCC in fast mode:
    /// a post-indexed LDC of the DTR is re-issued by every DTRTX read.
    fn slow_mem_read(&mut self, dest: &mut [u8], src: u32) -> Result<(), ArmError> {
        if dest.is_empty() {
            return Ok(());
        }

        let shift = (src & 3) as usize;
        let words = (dest.len() + shift + 3) / 4;
        let mut buf = vec![0u8; words * 4];

        // r0 is the streaming pointer, aligned down to a word.
        self.write_gpreg(0, src & !3)?;

        let mut dbgdscr: Dbgdscr = self.read_debug_reg()?;
        dbgdscr.set_extdccmode(DccMode::Fast);
        self.write_debug_reg(dbgdscr)?;

        self.execute_instruction(build_ldc(14, 5, 0, 4))?;

        // The first DTRTX read is specified to stall until the load
        // completes, but returns junk in practice; issue it and throw the
        // result away.
        let dtrtx = Dbgdtrtx::get_mmio_address_from_base(self.debug_base)?;
        self.apb_read(dtrtx)?;

        for i in 0..words {
            let word = self.apb_read(dtrtx)?;
            buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }

        dest.copy_from_slice(&buf[shift..shift + dest.len()]);

        dbgdscr.set_extdccmode(DccMode::Stall);
        self.write_debug_reg(dbgdscr)?;

        let status: Dbgdscr = self.read_debug_reg()?;
        if status.sdabort_l() {
            self.clear_sticky_abort()?;
            self.mmu_fault = true;
        } else {
            // Drain the word the re-issued load already fetched.
            self.apb_read(dtrtx)?;
        }

        Ok(())
    }

    /// Write target memory one byte at a time through an injected
    /// post-indexed STRB, checking for an abort after every byte so a
    /// fault stops exactly at the failing address.
    fn slow_mem_write_bytes(&mut self, dest: u32, src: &[u8]) -> Result<(), ArmError> {
        // r13 is the moving store pointer.
        self.write_gpreg(13, dest)?;

        for &byte in src {
            self.write_gpreg(0, byte as u32)?;
            self.execute_instruction(build_strb_postinc(0, 13, 1))?;

            let dbgdscr: Dbgdscr = self.read_debug_reg()?;
            if dbgdscr.sdabort_l() {
                self.clear_sticky_abort()?;
                self.mmu_fault = true;
                return Ok(());
            }
        }

        Ok(())
    }

    /// Write target memory by streaming words through the DCC in fast
    /// mode. Misaligned requests fall back to the byte loop.
    fn slow_mem_write(&mut self, dest: u32, src: &[u8]) -> Result<(), ArmError> {
        if src.is_empty() {
            return Ok(());
        }

        if dest & 3 != 0 || src.len() & 3 != 0 {
            return self.slow_mem_write_bytes(dest, src);
        }

        self.write_gpreg(0, dest)?;

        let mut dbgdscr: Dbgdscr = self.read_debug_reg()?;
        dbgdscr.set_extdccmode(DccMode::Fast);
        self.write_debug_reg(dbgdscr)?;

        self.execute_instruction(build_stc(14, 5, 0, 4))?;

        let dtrrx = Dbgdtrrx::get_mmio_address_from_base(self.debug_base)?;
        for chunk in src.chunks_exact(4) {
            self.apb_write(dtrrx, u32::from_le_bytes(chunk.try_into().unwrap()))?;
        }

        dbgdscr.set_extdccmode(DccMode::Stall);
        self.write_debug_reg(dbgdscr)?;

        let status: Dbgdscr = self.read_debug_reg()?;
        if status.sdabort_l() {
            self.clear_sticky_abort()?;
            self.mmu_fault = true;
        }

        Ok(())
    }

    /// Read `dest.len()` bytes of memory at virtual address `src`.
    pub fn mem_read(&mut self, dest: &mut [u8], src: u32) -> Result<(), ArmError> {
        match self.ahb {
            Some(ahb) => self.fast_mem_read(ahb, dest, src),
            None => self.slow_mem_read(dest, src),
        }
    }

    /// Write `src` to memory at virtual address `dest`.
    pub fn mem_write(&mut self, dest: u32, src: &[u8]) -> Result<(), ArmError> {
        match self.ahb {
            Some(ahb) => self.fast_mem_write(ahb, dest, src),
            None => self.slow_mem_write(dest, src),
        }
    }

    /// Write one word of target memory.
    pub fn mem_write32(&mut self, dest: u32, value: u32) -> Result<(), ArmError> {
        self.mem_write(dest, &value.to_le_bytes())
    }

    /// Arm halting debug mode and bring the core to a halt. Polls for the
    /// halt for up to two seconds, honouring an asserted system reset
    /// line; stale comparators are cleared once halted.
    pub fn attach(&mut self) -> Result<(), ArmError> {
        // Clear any pending fault condition.
        self.check_error();

        let mut dbgdscr: Dbgdscr = self.read_debug_reg()?;
        dbgdscr.set_hdbgen(true);
        dbgdscr.set_itren(true);
        dbgdscr.set_extdccmode(DccMode::Stall);
        self.write_debug_reg(dbgdscr)?;
        tracing::debug!("DBGDSCR = {:#010x}", u32::from(dbgdscr));

        self.halt_request()?;

        let mut tries = HALT_POLL_TRIES;
        loop {
            if self.platform.srst_get_val() {
                // Held in reset; the halt request latches and takes
                // effect on release.
                break;
            }
            if self.halt_wait()?.is_some() {
                break;
            }
            tries -= 1;
            if tries == 0 {
                return Err(ArmError::Timeout);
            }
            self.platform.delay(HALT_POLL_INTERVAL);
        }

        // Clear any stale breakpoints.
        for i in 0..self.hw_breakpoint_max {
            self.hw_breakpoint[i] = 0;
            let address = self.breakpoint_control_address(i)?;
            self.apb_write(address, 0)?;
        }

        self.platform.srst_set_val(false);

        Ok(())
    }

    /// Restore the core's registers, drop out of halting debug mode and
    /// let it run.
    pub fn detach(&mut self) -> Result<(), ArmError> {
        // Clear any stale breakpoints.
        for i in 0..self.hw_breakpoint_max {
            self.hw_breakpoint[i] = 0;
            let address = self.breakpoint_control_address(i)?;
            self.apb_write(address, 0)?;
        }

        self.flush_register_cache()?;
        self.execute_instruction(build_iciallu())?;

        let mut dbgdscr: Dbgdscr = self.read_debug_reg()?;
        dbgdscr.set_hdbgen(false);
        dbgdscr.set_itren(false);
        self.write_debug_reg(dbgdscr)?;

        // Clear sticky faults and restart.
        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        drcr.set_rrq(true);
        self.write_debug_reg(drcr)
    }

    /// Whether a debugger-induced fault occurred since the last call;
    /// clears the sticky fault. Only the system-bus AP's transport
    /// accumulator is consulted, matching the fact that APB faults
    /// already surfaced through the call that hit them.
    pub fn check_error(&mut self) -> bool {
        let transport = self.ahb.is_some() && self.dap.dp_error() != 0;
        let err = transport || self.mmu_fault;
        self.mmu_fault = false;
        err
    }

    /// Ask the core to halt. A timeout is tolerated: a core in WFI may
    /// stall the write until it wakes.
    pub fn halt_request(&mut self) -> Result<(), ArmError> {
        let mut drcr = Dbgdrcr(0);
        drcr.set_hrq(true);
        match self.write_debug_reg(drcr) {
            Err(e) if e.is_timeout() => {
                self.events.message("Timeout sending interrupt, is target in WFI?\n");
                Ok(())
            }
            other => other,
        }
    }

    /// Poll for a halt. `Ok(None)` means the core is still running (a
    /// timed-out status read counts: the core may be in WFI). On a halt,
    /// injection is re-enabled, the register cache is loaded and the stop
    /// signal is decoded from the method of entry. A hard transport fault
    /// means the probe has lost the target for good: the lifecycle sink
    /// is notified and [`Signal::Lost`] is reported.
    pub fn halt_wait(&mut self) -> Result<Option<Signal>, ArmError> {
        let mut dbgdscr: Dbgdscr = match self.read_debug_reg() {
            Ok(reg) => reg,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => {
                tracing::warn!("Lost contact with the target: {e}");
                self.events.target_lost();
                self.events.morse("TARGET LOST.", true);
                return Ok(Some(Signal::Lost));
            }
        };

        if !dbgdscr.halted() {
            return Ok(None);
        }

        tracing::debug!("Halted, DBGDSCR = {:#010x}", u32::from(dbgdscr));

        // Re-enable the ITR for the debug session.
        dbgdscr.set_itren(true);
        self.write_debug_reg(dbgdscr)?;

        let signal = match dbgdscr.halt_reason() {
            HaltReason::Request => Signal::Interrupt,
            _ => Signal::Trap,
        };

        self.load_register_cache()?;

        Ok(Some(signal))
    }

    /// Resume the core. With `step`, comparator 0 is borrowed as an
    /// instruction-address mismatch breakpoint on the current PC, so the
    /// core re-halts after executing exactly one instruction; otherwise
    /// comparator 0 is restored to its armed state.
    pub fn halt_resume(&mut self, step: bool) -> Result<(), ArmError> {
        if step {
            let addr = self.reg_cache.r[15];
            let size = if self.reg_cache.is_thumb() {
                BreakpointSize::Halfword
            } else {
                BreakpointSize::Word
            };
            let mut bcr = Dbgbcr(0);
            bcr.set_bt(Dbgbcr::BT_UNLINKED_MISMATCH);
            bcr.set_bas(bp_bas(addr, size));
            bcr.set_e(true);
            tracing::debug!("Stepping from {:#010x}, BAS = {:#06b}", addr, bcr.bas());

            let bvr_address = self.breakpoint_value_address(0)?;
            let bcr_address = self.breakpoint_control_address(0)?;
            self.apb_write(bvr_address, addr & !3)?;
            self.apb_write(bcr_address, bcr.into())?;
        } else {
            let bvr_address = self.breakpoint_value_address(0)?;
            let bcr_address = self.breakpoint_control_address(0)?;
            let armed = self.hw_breakpoint[0] & !3;
            let bpc0 = self.bpc0;
            self.apb_write(bvr_address, armed)?;
            self.apb_write(bcr_address, bpc0)?;
        }

        self.flush_register_cache()?;

        // The core may fetch stale instructions otherwise.
        self.execute_instruction(build_iciallu())?;

        let mut dbgdscr: Dbgdscr = self.read_debug_reg()?;
        dbgdscr.set_intdis(step);
        // The restart request is ignored while the ITR is enabled.
        dbgdscr.set_itren(false);
        self.write_debug_reg(dbgdscr)?;

        loop {
            let mut drcr = Dbgdrcr(0);
            drcr.set_cse(true);
            drcr.set_rrq(true);
            self.write_debug_reg(drcr)?;

            let dbgdscr: Dbgdscr = self.read_debug_reg()?;
            tracing::debug!("Restart poll, DBGDSCR = {:#010x}", u32::from(dbgdscr));
            if dbgdscr.restarted() {
                break;
            }
        }

        Ok(())
    }

    /// Platform-specific system reset; the session is re-attached
    /// afterwards.
    pub fn reset(&mut self) -> Result<(), ArmError> {
        let sequence = self.sequence.clone();
        sequence.reset_system(self)
    }

    /// Arm the lowest free comparator at `addr`.
    pub fn set_hw_breakpoint(&mut self, addr: u32, size: BreakpointSize) -> Result<(), Error> {
        let Some(index) =
            (0..self.hw_breakpoint_max).find(|&i| self.hw_breakpoint[i] & 1 == 0)
        else {
            return Err(Error::NoBreakpointSlot);
        };

        self.hw_breakpoint[index] = addr | 1;

        let bvr_address = self.breakpoint_value_address(index)?;
        self.apb_write(bvr_address, addr & !3)?;

        let mut bcr = Dbgbcr(0);
        bcr.set_bas(bp_bas(addr, size));
        bcr.set_e(true);
        let bcr_address = self.breakpoint_control_address(index)?;
        self.apb_write(bcr_address, bcr.into())?;

        if index == 0 {
            self.bpc0 = bcr.into();
        }

        Ok(())
    }

    /// Disarm the comparator holding `addr`.
    pub fn clear_hw_breakpoint(&mut self, addr: u32, _size: BreakpointSize) -> Result<(), Error> {
        let Some(index) =
            (0..self.hw_breakpoint_max).find(|&i| self.hw_breakpoint[i] & !1 == addr)
        else {
            return Err(Error::UnknownBreakpoint { addr });
        };

        self.hw_breakpoint[index] = 0;

        let bcr_address = self.breakpoint_control_address(index)?;
        self.apb_write(bcr_address, 0)?;

        if index == 0 {
            self.bpc0 = 0;
        }

        Ok(())
    }
}

impl Target for CortexA {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn target_description_xml(&self) -> &'static str {
        TARGET_DESCRIPTION_XML
    }

    fn attach(&mut self) -> Result<(), Error> {
        CortexA::attach(self).map_err(Error::from)
    }

    fn detach(&mut self) -> Result<(), Error> {
        CortexA::detach(self).map_err(Error::from)
    }

    fn check_error(&mut self) -> bool {
        CortexA::check_error(self)
    }

    fn mem_read(&mut self, dest: &mut [u8], src: u32) -> Result<(), Error> {
        CortexA::mem_read(self, dest, src).map_err(Error::from)
    }

    fn mem_write(&mut self, dest: u32, src: &[u8]) -> Result<(), Error> {
        CortexA::mem_write(self, dest, src).map_err(Error::from)
    }

    fn regs_size(&self) -> usize {
        CoreRegisters::SIZE
    }

    fn regs_read(&mut self, data: &mut [u8]) {
        self.reg_cache.write_bytes(data);
    }

    fn regs_write(&mut self, data: &[u8]) {
        self.reg_cache.read_bytes(data);
    }

    fn reset(&mut self) -> Result<(), Error> {
        CortexA::reset(self).map_err(Error::from)
    }

    fn halt_request(&mut self) -> Result<(), Error> {
        CortexA::halt_request(self).map_err(Error::from)
    }

    fn halt_wait(&mut self) -> Result<Option<Signal>, Error> {
        CortexA::halt_wait(self).map_err(Error::from)
    }

    fn halt_resume(&mut self, step: bool) -> Result<(), Error> {
        CortexA::halt_resume(self, step).map_err(Error::from)
    }

    fn set_hw_breakpoint(&mut self, addr: u32, size: BreakpointSize) -> Result<(), Error> {
        CortexA::set_hw_breakpoint(self, addr, size)
    }

    fn clear_hw_breakpoint(&mut self, addr: u32, size: BreakpointSize) -> Result<(), Error> {
        CortexA::clear_hw_breakpoint(self, addr, size)
    }
}
