//! Behavioral model of an ARMv7-A debug register block.
//!
//! The model sits behind the same ADIv5 seam as real hardware: it
//! emulates the DSCR/DRCR/ITR/DTR/BVR/BCR protocol, a register file and a
//! flat byte memory, and executes the instructions the driver injects.
//! Tests drive the public driver API end to end against it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use cortexa_debug::adiv5::{
    AccessPort, ArmError, DapAccess, DapError, LowAccess, AP_CSW, AP_DRW, AP_IDR, AP_TAR,
    DP_RDBUFF,
};
use cortexa_debug::target::{CoreRegisters, EventSink, Platform};
use cortexa_debug::CortexA;

/// Debug register block of CPU0 on a Zynq-7000.
pub const DEBUG_BASE: u32 = 0xF889_0000;
pub const APB_AP: u8 = 1;
pub const AHB_AP: u8 = 0;

pub const APB_IDR: u32 = 0x4477_0002;
pub const AHB_IDR: u32 = 0x4477_0001;

pub const ZYNQ_SLCR_UNLOCK: u32 = 0xF800_0008;
pub const ZYNQ_SLCR_UNLOCK_KEY: u32 = 0xDF0D;
pub const ZYNQ_SLCR_PSS_RST_CTRL: u32 = 0xF800_0200;

// DBGDSCR bits.
const DSCR_HALTED: u32 = 1 << 0;
const DSCR_RESTARTED: u32 = 1 << 1;
const DSCR_SDABORT: u32 = 1 << 6;
const DSCR_INTDIS: u32 = 1 << 11;
const DSCR_ITREN: u32 = 1 << 13;
const DSCR_HDBGEN: u32 = 1 << 14;
const DSCR_EXTDCCMODE_MASK: u32 = 3 << 20;
const DSCR_EXTDCCMODE_FAST: u32 = 2 << 20;
const DSCR_CONTROL_MASK: u32 =
    DSCR_INTDIS | DSCR_ITREN | DSCR_HDBGEN | DSCR_EXTDCCMODE_MASK;

// DBGDRCR bits.
const DRCR_HRQ: u32 = 1 << 0;
const DRCR_RRQ: u32 = 1 << 1;
const DRCR_CSE: u32 = 1 << 2;

// Debug register offsets from the block base.
const REG_DIDR: u32 = 0x000;
const REG_DTRRX: u32 = 0x080;
const REG_ITR: u32 = 0x084;
const REG_DSCR: u32 = 0x088;
const REG_DTRTX: u32 = 0x08C;
const REG_DRCR: u32 = 0x090;
const REG_BVR: u32 = 0x100;
const REG_BCR: u32 = 0x140;

// Opcodes the model executes, per the ARMv7-A ARM.
const OP_MCR_DTR: u32 = 0xEE00_0E15; // MCR p14, 0, r<t>, c0, c5, 0 (r<t> in bits 15:12)
const OP_MRC_DTR: u32 = 0xEE10_0E15; // MRC p14, 0, r<t>, c0, c5, 0
const OP_RT_MASK: u32 = 0xFFFF_0FFF;
const OP_MOV_R0_PC: u32 = 0xE1A0_000F;
const OP_MOV_PC_R0: u32 = 0xE1A0_F000;
const OP_MRS_R0: u32 = 0xE10F_0000;
const OP_MSR_R0: u32 = 0xE12F_F000;
const OP_VMRS_R0: u32 = 0xEEF1_0A10;
const OP_VMSR_R0: u32 = 0xEEE1_0A10;
const OP_VMOV_FROM_D: u32 = 0xEC51_0B10; // VMOV r0, r1, d<i> (d<i> in bits 3:0)
const OP_VMOV_TO_D: u32 = 0xEC41_0B10; // VMOV d<i>, r0, r1
const OP_D_MASK: u32 = 0xFFFF_FFF0;
const OP_LDC_DTR: u32 = 0xECB0_5E01; // LDC p14, c5, [r0], #4
const OP_STC_DTR: u32 = 0xECA0_5E01; // STC p14, c5, [r0], #4
const OP_STRB_SP: u32 = 0xE4CD_0001; // STRB r0, [sp], #1
const OP_DCCMVAC: u32 = 0xEE07_0F3A;
const OP_DCCIMVAC: u32 = 0xEE07_0F3E;
const OP_ICIALLU: u32 = 0xEE07_0F15;
const OP_ATS1CPR: u32 = 0xEE07_0F18;
const OP_READ_PAR: u32 = 0xEE17_0F14;

const JUNK_WORD: u32 = 0xDEAD_BEEF;

/// Fast-mode DCC streaming state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Idle,
    /// A load is armed but the first DTRTX read still returns junk.
    LoadJunk,
    Load,
    Store,
}

pub struct CoreModel {
    // Debug block state.
    pub didr: u32,
    /// DSCR control bits as last written by the driver.
    pub control: u32,
    pub halted: bool,
    restarted: bool,
    pub moe: u32,
    sdabort: bool,
    dtr_to_host: u32,
    dtr_from_host: u32,
    par: u32,
    stream: Stream,
    pub bvr: [u32; 16],
    pub bcr: [u32; 16],

    // Architectural state. `regs.r[15]` is the address of the next
    // instruction to execute, without any pipeline offset.
    pub regs: CoreRegisters,
    memory: HashMap<u32, u8>,

    // ADIv5 plumbing.
    tar: u32,
    posted: u32,
    csw: HashMap<u8, u32>,
    ap_idr: HashMap<u8, u32>,
    dp_error_state: u32,

    // Fault and quirk injection.
    /// While set, DSCR reads time out as if the core sat in WFI.
    pub wfi: bool,
    pending_halt: bool,
    /// Number of upcoming transport transactions that fail hard.
    pub fault_window: u32,
    reset_pending: bool,
    /// Flat VA -> PA offset applied by the emulated MMU.
    pub pa_offset: u32,
    /// VA range whose data accesses raise a synchronous abort.
    pub abort_start: u32,
    pub abort_len: u32,
    /// VA range whose translations fault.
    pub mmu_fault_start: u32,
    pub mmu_fault_len: u32,

    // Host-side observations.
    pub srst: bool,
    pub dcache_cleans: u32,
    pub dcache_clean_invalidates: u32,
    pub icache_invalidations: u32,
    pub messages: Vec<String>,
    pub lost: bool,
    pub delays: Vec<Duration>,
}

impl CoreModel {
    fn new(with_ahb: bool) -> Self {
        let mut ap_idr = HashMap::new();
        ap_idr.insert(APB_AP, APB_IDR);
        ap_idr.insert(AHB_AP, if with_ahb { AHB_IDR } else { 0 });

        Self {
            didr: 0x3513_0004, // v7 debug, 6 breakpoints, 4 watchpoints
            control: 0,
            halted: false,
            restarted: true,
            moe: 0,
            sdabort: false,
            dtr_to_host: 0,
            dtr_from_host: 0,
            par: 0,
            stream: Stream::Idle,
            bvr: [0; 16],
            bcr: [0; 16],
            regs: CoreRegisters::default(),
            memory: HashMap::new(),
            tar: 0,
            posted: 0,
            csw: HashMap::new(),
            ap_idr,
            dp_error_state: 0,
            wfi: false,
            pending_halt: false,
            fault_window: 0,
            reset_pending: false,
            pa_offset: 0,
            abort_start: 0,
            abort_len: 0,
            mmu_fault_start: 0,
            mmu_fault_len: 0,
            srst: false,
            dcache_cleans: 0,
            dcache_clean_invalidates: 0,
            icache_invalidations: 0,
            messages: Vec::new(),
            lost: false,
            delays: Vec::new(),
        }
    }

    fn translate(&self, va: u32) -> u32 {
        va.wrapping_add(self.pa_offset)
    }

    fn data_aborts(&self, va: u32) -> bool {
        self.abort_len != 0 && va >= self.abort_start && va < self.abort_start + self.abort_len
    }

    fn translation_faults(&self, va: u32) -> bool {
        self.mmu_fault_len != 0
            && va >= self.mmu_fault_start
            && va < self.mmu_fault_start + self.mmu_fault_len
    }

    pub fn mem_get(&self, pa: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| *self.memory.get(&(pa + i as u32)).unwrap_or(&0))
            .collect()
    }

    pub fn mem_set(&mut self, pa: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.memory.insert(pa + i as u32, b);
        }
    }

    pub fn mem_get32(&self, pa: u32) -> u32 {
        u32::from_le_bytes(self.mem_get(pa, 4).try_into().unwrap())
    }

    pub fn csw_of(&self, ap: u8) -> u32 {
        *self.csw.get(&ap).unwrap_or(&0)
    }

    /// Put the core into debug state with the given method of entry.
    pub fn force_halt(&mut self, moe: u32) {
        self.halted = true;
        self.moe = moe;
    }

    fn is_thumb(&self) -> bool {
        self.regs.cpsr & CoreRegisters::CPSR_THUMB != 0
    }

    fn load_word(&mut self, va: u32) -> u32 {
        if self.data_aborts(va) {
            self.sdabort = true;
            return 0;
        }
        let pa = self.translate(va);
        u32::from_le_bytes(self.mem_get(pa, 4).try_into().unwrap())
    }

    fn store_word(&mut self, va: u32, value: u32) {
        if self.data_aborts(va) {
            self.sdabort = true;
            return;
        }
        let pa = self.translate(va);
        self.mem_set(pa, &value.to_le_bytes());
        if pa == ZYNQ_SLCR_PSS_RST_CTRL && value == 1 {
            // A PS reset is now pending; it fires when the reset line is
            // pulsed and takes the debug port off the scan chain.
            self.reset_pending = true;
        }
    }

    fn store_byte(&mut self, va: u32, value: u8) -> bool {
        if self.data_aborts(va) {
            self.sdabort = true;
            return false;
        }
        let pa = self.translate(va);
        self.memory.insert(pa, value);
        true
    }

    /// Execute one injected instruction in debug state.
    fn execute(&mut self, op: u32) {
        assert!(self.halted, "ITR injection while the core is running");
        assert!(
            self.control & DSCR_ITREN != 0,
            "ITR injection with ITREN clear"
        );

        let fast = self.control & DSCR_EXTDCCMODE_MASK == DSCR_EXTDCCMODE_FAST;

        match op {
            OP_MOV_R0_PC => {
                let offset = if self.is_thumb() { 4 } else { 8 };
                self.regs.r[0] = self.regs.r[15].wrapping_add(offset);
            }
            OP_MOV_PC_R0 => self.regs.r[15] = self.regs.r[0],
            OP_MRS_R0 => self.regs.r[0] = self.regs.cpsr,
            OP_MSR_R0 => self.regs.cpsr = self.regs.r[0],
            OP_VMRS_R0 => self.regs.r[0] = self.regs.fpscr,
            OP_VMSR_R0 => self.regs.fpscr = self.regs.r[0],
            OP_LDC_DTR => {
                if fast {
                    self.stream = Stream::LoadJunk;
                } else {
                    let value = self.load_word(self.regs.r[0]);
                    self.dtr_to_host = value;
                    self.regs.r[0] = self.regs.r[0].wrapping_add(4);
                }
            }
            OP_STC_DTR => {
                if fast {
                    self.stream = Stream::Store;
                } else {
                    let value = self.dtr_from_host;
                    self.store_word(self.regs.r[0], value);
                    self.regs.r[0] = self.regs.r[0].wrapping_add(4);
                }
            }
            OP_STRB_SP => {
                let value = self.regs.r[0] as u8;
                if self.store_byte(self.regs.r[13], value) {
                    self.regs.r[13] = self.regs.r[13].wrapping_add(1);
                }
            }
            OP_DCCMVAC => self.dcache_cleans += 1,
            OP_DCCIMVAC => self.dcache_clean_invalidates += 1,
            OP_ICIALLU => self.icache_invalidations += 1,
            OP_ATS1CPR => {
                let va = self.regs.r[0];
                self.par = if self.translation_faults(va) {
                    1
                } else {
                    self.translate(va) & !0xFFF
                };
            }
            OP_READ_PAR => self.regs.r[0] = self.par,
            _ if op & OP_RT_MASK == OP_MCR_DTR => {
                let rt = ((op >> 12) & 0xF) as usize;
                self.dtr_to_host = self.regs.r[rt];
            }
            _ if op & OP_RT_MASK == OP_MRC_DTR => {
                let rt = ((op >> 12) & 0xF) as usize;
                self.regs.r[rt] = self.dtr_from_host;
            }
            _ if op & OP_D_MASK == OP_VMOV_FROM_D => {
                let d = self.regs.d[(op & 0xF) as usize];
                self.regs.r[0] = d as u32;
                self.regs.r[1] = (d >> 32) as u32;
            }
            _ if op & OP_D_MASK == OP_VMOV_TO_D => {
                let low = self.regs.r[0] as u64;
                let high = self.regs.r[1] as u64;
                self.regs.d[(op & 0xF) as usize] = (high << 32) | low;
            }
            _ => panic!("model cannot execute injected opcode {op:#010x}"),
        }
    }

    fn restart(&mut self) {
        self.halted = false;
        self.restarted = true;
        self.stream = Stream::Idle;

        // An enabled instruction-address mismatch comparator on slot 0
        // re-halts the core after exactly one instruction.
        let mismatch = self.bcr[0] & 1 != 0 && (self.bcr[0] >> 20) & 0xF == 0b0100;
        if mismatch {
            let size = if self.is_thumb() { 2 } else { 4 };
            self.regs.r[15] = self.regs.r[15].wrapping_add(size);
            self.halted = true;
            self.moe = 0b0001;
        }
    }

    fn debug_read(&mut self, offset: u32) -> Result<u32, ArmError> {
        match offset {
            REG_DIDR => Ok(self.didr),
            REG_DSCR => {
                if self.wfi {
                    return Err(ArmError::Timeout);
                }
                let mut value = self.control;
                if self.halted {
                    value |= DSCR_HALTED;
                }
                if self.restarted {
                    value |= DSCR_RESTARTED;
                }
                if self.sdabort {
                    value |= DSCR_SDABORT;
                }
                value |= (self.moe & 0xF) << 2;
                Ok(value)
            }
            REG_DTRTX => match self.stream {
                Stream::LoadJunk => {
                    self.stream = Stream::Load;
                    Ok(JUNK_WORD)
                }
                Stream::Load => {
                    let value = self.load_word(self.regs.r[0]);
                    self.regs.r[0] = self.regs.r[0].wrapping_add(4);
                    Ok(value)
                }
                _ => Ok(self.dtr_to_host),
            },
            _ if (REG_BVR..REG_BVR + 64).contains(&offset) => {
                Ok(self.bvr[((offset - REG_BVR) / 4) as usize])
            }
            _ if (REG_BCR..REG_BCR + 64).contains(&offset) => {
                Ok(self.bcr[((offset - REG_BCR) / 4) as usize])
            }
            _ => panic!("unexpected debug register read at offset {offset:#x}"),
        }
    }

    fn debug_write(&mut self, offset: u32, value: u32) -> Result<(), ArmError> {
        match offset {
            REG_DTRRX => {
                if self.stream == Stream::Store {
                    self.store_word(self.regs.r[0], value);
                    self.regs.r[0] = self.regs.r[0].wrapping_add(4);
                } else {
                    self.dtr_from_host = value;
                }
            }
            REG_ITR => self.execute(value),
            REG_DSCR => {
                self.control = value & DSCR_CONTROL_MASK;
                if self.control & DSCR_EXTDCCMODE_MASK != DSCR_EXTDCCMODE_FAST {
                    self.stream = Stream::Idle;
                }
            }
            REG_DRCR => {
                if value & DRCR_CSE != 0 {
                    self.sdabort = false;
                }
                if value & DRCR_HRQ != 0 {
                    if self.wfi {
                        self.pending_halt = true;
                    } else {
                        self.force_halt(0b0000);
                    }
                }
                if value & DRCR_RRQ != 0 {
                    self.restart();
                }
            }
            _ if (REG_BVR..REG_BVR + 64).contains(&offset) => {
                self.bvr[((offset - REG_BVR) / 4) as usize] = value;
            }
            _ if (REG_BCR..REG_BCR + 64).contains(&offset) => {
                self.bcr[((offset - REG_BCR) / 4) as usize] = value;
            }
            _ => panic!("unexpected debug register write at offset {offset:#x}"),
        }
        Ok(())
    }

    /// Leave WFI; a pending halt request takes effect now.
    pub fn wake(&mut self) {
        self.wfi = false;
        if self.pending_halt {
            self.pending_halt = false;
            self.force_halt(0b0000);
        }
    }
}

/// Shared handle to a [`CoreModel`], implementing every collaborator seam
/// of the driver.
#[derive(Clone)]
pub struct ModelHandle(Rc<RefCell<CoreModel>>);

impl ModelHandle {
    pub fn new(with_ahb: bool) -> Self {
        Self(Rc::new(RefCell::new(CoreModel::new(with_ahb))))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut CoreModel) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    fn check_fault(&self) -> Result<(), ArmError> {
        let mut model = self.0.borrow_mut();
        if model.fault_window > 0 {
            model.fault_window -= 1;
            model.dp_error_state |= 0x20;
            return Err(ArmError::Dap(DapError::NoAcknowledge));
        }
        Ok(())
    }
}

impl DapAccess for ModelHandle {
    fn ap_read(&mut self, ap: u8, addr: u8) -> Result<u32, ArmError> {
        self.check_fault()?;
        let model = self.0.borrow();
        match addr {
            AP_IDR => Ok(*model.ap_idr.get(&ap).unwrap_or(&0)),
            AP_CSW => Ok(*model.csw.get(&ap).unwrap_or(&0)),
            AP_TAR => Ok(model.tar),
            _ => panic!("unexpected AP register read {addr:#x}"),
        }
    }

    fn ap_write(&mut self, ap: u8, addr: u8, value: u32) -> Result<(), ArmError> {
        self.check_fault()?;
        let mut model = self.0.borrow_mut();
        match addr {
            AP_TAR => model.tar = value,
            AP_CSW => {
                model.csw.insert(ap, value);
            }
            _ => panic!("unexpected AP register write {addr:#x}"),
        }
        Ok(())
    }

    fn dp_low_access(&mut self, dir: LowAccess, addr: u8, value: u32) -> Result<u32, ArmError> {
        self.check_fault()?;
        let mut model = self.0.borrow_mut();
        let offset = model
            .tar
            .checked_sub(DEBUG_BASE)
            .expect("DRW access outside the debug register block");
        match (dir, addr) {
            (LowAccess::Write, AP_DRW) => {
                model.debug_write(offset, value)?;
                Ok(0)
            }
            (LowAccess::Read, AP_DRW) => {
                let previous = model.posted;
                model.posted = model.debug_read(offset)?;
                Ok(previous)
            }
            (LowAccess::Read, DP_RDBUFF) => Ok(model.posted),
            _ => panic!("unexpected DP low access {dir:?} {addr:#x}"),
        }
    }

    fn dp_error(&mut self) -> u32 {
        std::mem::take(&mut self.0.borrow_mut().dp_error_state)
    }

    fn memory_read(&mut self, ap: u8, dest: &mut [u8], address: u32) -> Result<(), ArmError> {
        self.check_fault()?;
        assert_eq!(ap, AHB_AP, "block memory access on a non-AHB AP");
        let model = self.0.borrow();
        dest.copy_from_slice(&model.mem_get(address, dest.len()));
        Ok(())
    }

    fn memory_write(&mut self, ap: u8, address: u32, src: &[u8]) -> Result<(), ArmError> {
        self.check_fault()?;
        assert_eq!(ap, AHB_AP, "block memory access on a non-AHB AP");
        self.0.borrow_mut().mem_set(address, src);
        Ok(())
    }
}

impl Platform for ModelHandle {
    fn srst_set_val(&mut self, assert: bool) {
        let mut model = self.0.borrow_mut();
        model.srst = assert;
        if assert && model.reset_pending {
            // The PS reset takes effect: the core drops out of debug
            // state and the DP falls off the scan chain for a while.
            model.reset_pending = false;
            model.halted = false;
            model.control = 0;
            model.fault_window = 7;
        }
    }

    fn srst_get_val(&self) -> bool {
        self.0.borrow().srst
    }

    fn delay(&mut self, duration: Duration) {
        self.0.borrow_mut().delays.push(duration);
    }
}

impl EventSink for ModelHandle {
    fn message(&mut self, msg: &str) {
        self.0.borrow_mut().messages.push(msg.to_string());
    }

    fn morse(&mut self, msg: &str, _repeat: bool) {
        self.0.borrow_mut().messages.push(msg.to_string());
    }

    fn target_lost(&mut self) {
        self.0.borrow_mut().lost = true;
    }
}

/// Probe a session against a fresh model.
pub fn probe_target(with_ahb: bool) -> (CortexA, ModelHandle) {
    let model = ModelHandle::new(with_ahb);
    let target = CortexA::probe(
        Box::new(model.clone()),
        Box::new(model.clone()),
        Box::new(model.clone()),
        AccessPort { index: APB_AP, idr: APB_IDR },
        DEBUG_BASE,
    )
    .expect("probe against the model failed");
    (target, model)
}

/// Probe and attach, leaving the core halted.
pub fn attached_target(with_ahb: bool) -> (CortexA, ModelHandle) {
    let (mut target, model) = probe_target(with_ahb);
    target.attach().expect("attach against the model failed");
    assert!(model.with(|m| m.halted));
    (target, model)
}
