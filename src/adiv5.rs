//! ADIv5 collaborator contracts.
//!
//! The driver does not speak SWD or JTAG itself; it sits on top of an ARM
//! Debug Interface v5 implementation that exposes Debug Ports and Access
//! Ports. This module defines the seam: the [`DapAccess`] trait the
//! transport implements, the handful of AP/DP register addresses the driver
//! touches directly, and the [`AccessPort`] descriptor used during
//! discovery.

use crate::memory_mapped_registers::RegisterAddressOutOfBounds;

/// An error in the communication with an access port or debug port.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DapError {
    /// An error occurred during SWD communication.
    #[error("An error occurred in the SWD communication between probe and device.")]
    SwdProtocol,
    /// The target device did not respond to the request.
    #[error("Target device did not respond to request.")]
    NoAcknowledge,
    /// The target device responded with a FAULT response to the request.
    #[error("Target device responded with a FAULT response to the request.")]
    FaultResponse,
    /// Target device responded with a WAIT response to the request.
    #[error("Target device responded with a WAIT response to the request.")]
    WaitResponse,
    /// The parity bit on the read request was incorrect.
    #[error("Incorrect parity on READ request.")]
    IncorrectParity,
}

/// Errors of the ARM debug layer.
///
/// [`ArmError::Timeout`] is the one recoverable category: a stalled access
/// against a core that is clock-gated or sitting in WFI. Everything else
/// means the transaction itself failed.
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    /// The operation timed out.
    #[error("The operation timed out.")]
    Timeout,

    /// Collision in the debug port communication.
    #[error("An error occurred in the DAP communication.")]
    Dap(#[from] DapError),

    /// Core is running but the operation requires it to be halted.
    #[error("Core is running but the operation requires it to be halted.")]
    CoreNotHalted,

    /// A data abort occurred while executing an instruction in debug state.
    #[error("A data abort occurred.")]
    DataAbort,

    /// A register address computation overflowed.
    #[error(transparent)]
    RegisterAddressOutOfBounds(#[from] RegisterAddressOutOfBounds),
}

impl ArmError {
    /// Whether this error is the tolerated timeout category rather than a
    /// hard transport fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ArmError::Timeout)
    }
}

/// Direction of a posted low-level debug port access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowAccess {
    /// Posted read. The result is retrieved by a follow-up read of
    /// [`DP_RDBUFF`].
    Read,
    /// Write.
    Write,
}

/// Control and Status Word register of a MEM-AP.
pub const AP_CSW: u8 = 0x00;
/// Transfer Address Register of a MEM-AP.
pub const AP_TAR: u8 = 0x04;
/// Data Read/Write register of a MEM-AP.
pub const AP_DRW: u8 = 0x0C;
/// Identification Register of an AP.
pub const AP_IDR: u8 = 0xFC;

/// Read Buffer of the debug port, holding the result of a posted read.
pub const DP_RDBUFF: u8 = 0x0C;

/// CSW.Size field mask.
pub const CSW_SIZE_MASK: u32 = 0b111;
/// CSW.Size encoding for 32-bit transfers.
pub const CSW_SIZE_WORD: u32 = 0b010;

/// IDR mask identifying an AHB-AP onto the system bus. Class, type and
/// designer fields are compared; revision and variant are not.
pub const AHB_IDR_MASK: u32 = 0x0FFF_E00F;
/// IDR value matched under [`AHB_IDR_MASK`].
pub const AHB_IDR_VALUE: u32 = 0x0477_0001;

/// Low-level access to an ADIv5 debug port and its access ports.
///
/// Implementations own the wire protocol, the SELECT banking and the sticky
/// error tracking of the DP. All methods are synchronous; a blocked access
/// against a stalled target surfaces as [`ArmError::Timeout`].
pub trait DapAccess {
    /// Read an AP register.
    fn ap_read(&mut self, ap: u8, addr: u8) -> Result<u32, ArmError>;

    /// Write an AP register.
    fn ap_write(&mut self, ap: u8, addr: u8, value: u32) -> Result<(), ArmError>;

    /// Issue a single posted transaction on the currently selected AP, or a
    /// DP register access. A posted read returns the result of the
    /// *previous* posted transaction; callers retrieve the final value with
    /// a read of [`DP_RDBUFF`].
    fn dp_low_access(&mut self, dir: LowAccess, addr: u8, value: u32) -> Result<u32, ArmError>;

    /// Read and clear the accumulated sticky transport error state of the
    /// debug port. Non-zero means at least one transaction faulted since
    /// the last call.
    fn dp_error(&mut self) -> u32;

    /// Block read of system memory through a MEM-AP, using the transport's
    /// address auto-increment engine.
    fn memory_read(&mut self, ap: u8, dest: &mut [u8], address: u32) -> Result<(), ArmError>;

    /// Block write of system memory through a MEM-AP.
    fn memory_write(&mut self, ap: u8, address: u32, src: &[u8]) -> Result<(), ArmError>;
}

/// Descriptor of a discovered access port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPort {
    /// AP index in the debug port's AP address space.
    pub index: u8,
    /// Cached IDR value read at discovery time.
    pub idr: u32,
}

impl AccessPort {
    /// Read the IDR of AP `index` and build a descriptor for it.
    pub fn discover(dap: &mut dyn DapAccess, index: u8) -> Result<Self, ArmError> {
        let idr = dap.ap_read(index, AP_IDR)?;
        Ok(Self { index, idr })
    }

    /// Whether this AP identifies as an AHB-AP onto the system bus.
    pub fn is_ahb(&self) -> bool {
        (self.idr & AHB_IDR_MASK) == AHB_IDR_VALUE
    }
}
