//! Platform-specific reset sequences.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adiv5::ArmError;
use crate::armv7a::CortexA;

/// A platform-specific way to reset the system behind a debug session.
///
/// Implementations run against the live session: they may write target
/// memory, wiggle the reset line and re-attach once the system is back.
pub trait ResetSequence {
    /// Reset the target system, leaving the session attached and the core
    /// halted.
    fn reset_system(&self, core: &mut CortexA) -> Result<(), ArmError>;
}

/// Reset dance for the Xilinx Zynq-7000 (Zynq-7000 TRM, Xilinx UG585).
///
/// The part disconnects the debug port from the JTAG scan chain while the
/// PS reset is in progress, so transport errors are expected until the
/// port comes back.
pub struct Zynq7000 {}

const SLCR_UNLOCK: u32 = 0xF800_0008;
const SLCR_UNLOCK_KEY: u32 = 0xDF0D;
const SLCR_PSS_RST_CTRL: u32 = 0xF800_0200;

const REACQUIRE_WINDOW: Duration = Duration::from_secs(1);
const SETTLE_DELAY: Duration = Duration::from_millis(100);

impl Zynq7000 {
    /// Create the sequencer for Zynq-7000 parts.
    pub fn create() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl ResetSequence for Zynq7000 {
    fn reset_system(&self, core: &mut CortexA) -> Result<(), ArmError> {
        tracing::debug!("zynq7000: PSS soft reset through the SLCR");
        core.mem_write32(SLCR_UNLOCK, SLCR_UNLOCK_KEY)?;
        core.mem_write32(SLCR_PSS_RST_CTRL, 1)?;

        // Pulse the hard reset line too.
        core.platform_mut().srst_set_val(true);
        core.platform_mut().srst_set_val(false);

        // Spin until the debug port reappears on the scan chain. A timed
        // out read means the port answered but the core is stalled, which
        // the attach below deals with.
        let start = Instant::now();
        loop {
            match core.read_didr() {
                Ok(_) => break,
                Err(e) if e.is_timeout() => break,
                Err(e) => {
                    if start.elapsed() >= REACQUIRE_WINDOW {
                        return Err(e);
                    }
                }
            }
        }

        core.platform_mut().delay(SETTLE_DELAY);

        core.attach()
    }
}
