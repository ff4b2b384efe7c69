//! Hardware breakpoints through the Enhanced Emulation Module.
//!
//! The EEM exposes a register file over the `IR_EMEX_DATA_EXCHANGE`
//! instruction: one address word (read/write flag in bit 0) followed by one
//! value word per access.  Eight trigger blocks of 8 bytes each sit at the
//! bottom of the address space; the reaction registers follow.  The layout
//! and the trigger wiring are described in SLAU414 ("EEM", figure 1-1).
use core::ops::DerefMut;

use log::{debug, error};

use crate::cable::Cable;
use crate::jtag::{Error, Jtag, Result, IR_EMEX_DATA_EXCHANGE};

// EEM register access: the address word carries the direction in bit 0
pub const READ: u16 = 0x0000;
pub const WRITE: u16 = 0x0001;

// trigger block registers, 8 bytes per block
pub const MBTRIGX_VAL: u16 = 0x0000;
pub const MBTRIGX_CTL: u16 = 0x0002;
pub const MBTRIGX_MSK: u16 = 0x0004;
pub const MBTRIGX_CMB: u16 = 0x0006;

// reaction and control registers
pub const BREAKREACT: u16 = 0x0080;
pub const GENCTRL: u16 = 0x0088;
pub const TRIGFLAG: u16 = 0x008E;
pub const STOR_REACT: u16 = 0x0098;

// GENCTRL bits
pub const EEM_EN: u16 = 0x0001;
pub const CLEAR_STOP: u16 = 0x0002;
pub const EMU_CLK_EN: u16 = 0x0004;
pub const EMU_FEAT_EN: u16 = 0x0008;
pub const DEB_TRIG_LATCH: u16 = 0x0010;

// MBTRIGX_CTL fields
pub const MAB: u16 = 0x0000;
pub const MDB: u16 = 0x0001;
pub const TRIG_0: u16 = 0x0000;
pub const CMP_EQUAL: u16 = 0x0000;
pub const CMP_GREATER: u16 = 0x0008;
pub const CMP_LESS: u16 = 0x0010;

// MBTRIGX_MSK value for an exact compare
pub const NO_MASK: u16 = 0x0000;

/// Number of trigger blocks in the EEM.
pub const MAX_BREAKPOINTS: usize = 8;

/// Kind of a breakpoint table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BreakpointType {
    None,
    Break,
}

/// One entry of a caller-owned breakpoint table.  The session only reads
/// entries and clears their `dirty` flag after a successful refresh.
#[derive(Clone, Copy, Debug)]
pub struct Breakpoint {
    pub bp_type: BreakpointType,
    pub addr: u16,
    pub enabled: bool,
    pub dirty: bool,
}

impl Breakpoint {
    pub const fn none() -> Self {
        Self {
            bp_type: BreakpointType::None,
            addr: 0,
            enabled: false,
            dirty: false,
        }
    }
}

impl<T, U> Jtag<T>
where
    T: DerefMut<Target = U>,
    U: Cable + ?Sized,
{
    /// Program hardware trigger `bp_num` to break on a fetch from
    /// `bp_addr`.  A negative slot disables all breakpoints by clearing the
    /// reaction mask; a slot beyond the hardware range fails without
    /// touching the target.
    pub fn set_breakpoint(&mut self, bp_num: i32, bp_addr: u16) -> Result<()> {
        if bp_num >= MAX_BREAKPOINTS as i32 {
            error!(
                "set_breakpoint: no slot {} for breakpoint at {:#06x}",
                bp_num, bp_addr
            );
            self.fail();
            return Err(Error::BadBreakpoint(bp_num));
        }

        if bp_num < 0 {
            // a cleared reaction mask disables every slot at once
            self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
            self.cable.dr_shift_16(BREAKREACT + WRITE);
            self.cable.dr_shift_16(0x0000);
            return Ok(());
        }
        let bp_num = bp_num as u16;

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(GENCTRL + WRITE);
        self.cable
            .dr_shift_16(EEM_EN + CLEAR_STOP + EMU_CLK_EN + EMU_FEAT_EN);

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(8 * bp_num + MBTRIGX_VAL + WRITE);
        self.cable.dr_shift_16(bp_addr);

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(8 * bp_num + MBTRIGX_CTL + WRITE);
        self.cable.dr_shift_16(MAB + TRIG_0 + CMP_EQUAL);

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(8 * bp_num + MBTRIGX_MSK + WRITE);
        self.cable.dr_shift_16(NO_MASK);

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(8 * bp_num + MBTRIGX_CMB + WRITE);
        self.cable.dr_shift_16(1 << bp_num);

        // Reading BREAKREACT shifts an extra bit into the LSB; shift it
        // back out before setting the new slot's bit and writing back.
        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        let mut breakreact = self.cable.dr_shift_16_read(BREAKREACT + READ);
        breakreact = breakreact.wrapping_add(self.cable.dr_shift_16_read(0x0000));
        breakreact = (breakreact >> 1) | (1 << bp_num);
        self.cable.dr_shift_16(BREAKREACT + WRITE);
        self.cable.dr_shift_16(breakreact);
        self.cable.flush_writes();

        Ok(())
    }

    /// Reprogram every dirty entry of a caller-owned breakpoint table.
    /// Failing entries are reported but do not stop the refresh; `dirty` is
    /// cleared only on success.
    pub fn refresh_breakpoints(&mut self, table: &mut [Breakpoint]) -> Result<()> {
        let mut result = Ok(());

        for (i, bp) in table.iter_mut().enumerate() {
            debug!(
                "refresh breakpoint {}: type={:?} addr={:#06x} enabled={} dirty={}",
                i, bp.bp_type, bp.addr, bp.enabled, bp.dirty
            );

            if bp.dirty && bp.bp_type == BreakpointType::Break {
                let addr = if bp.enabled { bp.addr } else { 0 };

                match self.set_breakpoint(i as i32, addr) {
                    Ok(()) => bp.dirty = false,
                    Err(e) => {
                        error!("failed to refresh breakpoint #{}", i);
                        result = Err(e);
                    }
                }
            }
        }

        result
    }
}
