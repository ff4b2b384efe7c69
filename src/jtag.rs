//! The `Jtag` session drives a halted MSP430 over an adapter implementing
//! [`Cable`](crate::cable::Cable): device identification, CPU start/stop,
//! register and memory access, and PSA-based bulk verification.  Flash
//! programming and breakpoint handling build on this in the `flash` and
//! `eem` modules.
//!
//! The shift sequences follow TI's SLAA149 application report.  Control
//! words, instruction encodings and TCLK pulse counts are part of the wire
//! protocol and are tied to target silicon; they are not tunable.
use alloc::vec::Vec;
use core::ops::DerefMut;

use log::error;
use thiserror::Error;

use crate::cable::Cable;
use crate::eem::{BREAKREACT, READ};

/// JTAG identification value for all existing flash-based MSP430 devices.
pub const JTAG_ID: u8 = 0x89;

// JTAG instructions.  The IR of this family has its physical bit order
// reversed, so the constants are the bit-reversed forms of the natural
// encodings (given alongside) and must be shifted MSB first as-is.

// control signal register
pub const IR_CNTRL_SIG_16BIT: u8 = 0xC8; // 0x13
pub const IR_CNTRL_SIG_CAPTURE: u8 = 0x28; // 0x14
pub const IR_CNTRL_SIG_RELEASE: u8 = 0xA8; // 0x15
// data register
pub const IR_DATA_16BIT: u8 = 0x82; // 0x41
pub const IR_DATA_CAPTURE: u8 = 0x42; // 0x42
pub const IR_DATA_QUICK: u8 = 0xC2; // 0x43
// address register
pub const IR_ADDR_16BIT: u8 = 0xC1; // 0x83
pub const IR_ADDR_CAPTURE: u8 = 0x21; // 0x84
pub const IR_DATA_TO_ADDR: u8 = 0xA1; // 0x85
// pseudo signature analysis
pub const IR_DATA_PSA: u8 = 0x22; // 0x44
pub const IR_SHIFT_OUT_PSA: u8 = 0x62; // 0x46
// security fuse
pub const IR_PREPARE_BLOW: u8 = 0x44; // 0x22
pub const IR_EX_BLOW: u8 = 0x24; // 0x24
// configuration fuses
pub const IR_CONFIG_FUSES: u8 = 0x94;
pub const IR_BYPASS: u8 = 0xFF; // 0xFF
// emulation module
pub const IR_EMEX_DATA_EXCHANGE: u8 = 0x90; // 0x09
pub const IR_EMEX_WRITE_CONTROL: u8 = 0x30; // 0x0C
pub const IR_EMEX_READ_CONTROL: u8 = 0xD0; // 0x0B

/// Pass to [`Jtag::release_device`] to resume execution at the current PC.
pub const RUN_FROM_PC: u16 = 0xFFFF;
/// Pass to [`Jtag::release_device`] to reset the target and run from the
/// reset vector, deleting all breakpoints on the way.
pub const RUN_FROM_RESET: u16 = 0xFFFE;

/// Failures of the debug link or the target.  Every variant also latches the
/// session's sticky `failed` flag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("target failed to synchronize")]
    SyncTimeout,
    #[error("instruction fetch state not reached")]
    FetchTimeout,
    #[error("single step timed out")]
    StepTimeout,
    #[error("JTAG security fuse is blown")]
    FuseBlown,
    #[error("power-up clear failed")]
    PucFailed,
    #[error("flash routine did not finish in time")]
    FlashTimeout,
    #[error("verify mismatch (expected {expected:#06x}, found {found:#06x})")]
    VerifyMismatch { expected: u16, found: u16 },
    #[error("no hardware breakpoint slot {0}")]
    BadBreakpoint(i32),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Memory access width.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
    Byte,
    Word,
}

/// CPU execution state as reported by the EEM.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpuState {
    Running,
    Halted,
}

/// One debug session against one physical target.
///
/// Owns the cable exclusively; interleaving shifts from two callers would
/// corrupt the TAP state, so a session must never be shared.  The `failed`
/// flag is sticky: once any operation reports a failure the target may be
/// left halted mid-sequence, and the caller should release or reset it
/// rather than issue further operations.
pub struct Jtag<T> {
    pub cable: T,
    failed: bool,
}

impl<T, U> Jtag<T>
where
    T: DerefMut<Target = U>,
    U: Cable + ?Sized,
{
    /// Create a session from an existing `Cable`.  No lines are touched
    /// until [`init`](Self::init).
    pub fn new(cable: T) -> Self {
        Self {
            cable,
            failed: false,
        }
    }

    /// Whether any operation on this session has failed.  Never cleared.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn fail(&mut self) {
        self.failed = true;
    }

    /// Take the target under JTAG control and disable its watchdog.
    /// Returns the JTAG id (0x89 on this family).
    pub fn init(&mut self) -> Result<u8> {
        self.cable.init_dap();

        if self.is_fuse_blown() {
            error!("init: security fuse is blown");
            self.fail();
            return Err(Error::FuseBlown);
        }

        let jtag_id = self.get_device()?;

        // a PUC must not change the identification
        if self.execute_puc()? != jtag_id {
            error!("init: power-up clear failed");
            self.fail();
            return Err(Error::PucFailed);
        }

        Ok(jtag_id)
    }

    /// Set the device into JTAG mode and wait for it to synchronize.
    /// Returns the captured JTAG id.
    pub fn get_device(&mut self) -> Result<u8> {
        // put the control signal register into JTAG mode, read access
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);

        let jtag_id = self.cable.ir_shift_read(IR_CNTRL_SIG_CAPTURE);

        // bounded wait for the CPU to come up synchronized
        let mut synced = false;
        for _ in 0..50 {
            if self.cable.dr_shift_16_read(0x0000) & 0x0200 == 0x0200 {
                synced = true;
                break;
            }
        }

        if !synced {
            error!("get_device: timed out");
            self.fail();
            return Err(Error::SyncTimeout);
        }

        self.cable.led_green(true);
        Ok(jtag_id)
    }

    /// Check whether the JTAG access security fuse is blown.
    pub fn is_fuse_blown(&mut self) -> bool {
        // the first capture after connecting can misread, so probe three
        // times before believing the answer
        for _ in 0..3 {
            self.cable.ir_shift(IR_CNTRL_SIG_CAPTURE);
            if self.cable.dr_shift_16_read(0xAAAA) == 0x5555 {
                return true;
            }
        }

        false
    }

    /// Execute a power-up clear using the control signal register, then
    /// disable the target watchdog.  Returns the JTAG id read back after the
    /// reset so callers can confirm identification survived.
    pub fn execute_puc(&mut self) -> Result<u8> {
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);

        // pulse the reset bit, then clock the cleared CPU three times
        self.cable.dr_shift_16(0x2C01);
        self.cable.dr_shift_16(0x2401);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);

        let jtag_id = self.cable.ir_shift_read(IR_ADDR_CAPTURE);

        // stop the watchdog before it can reset the target again
        self.write_mem(Format::Word, 0x0120, 0x5A80)?;

        Ok(jtag_id)
    }

    /// Read the target chip id word.  The two bytes are stored in reverse
    /// order at 0x0FF0.
    pub fn chip_id(&mut self) -> Result<u16> {
        let chip_id = self.read_mem(Format::Word, 0x0FF0)?;
        Ok(chip_id << 8 | chip_id >> 8)
    }

    /// Bring the target CPU into the instruction fetch state.
    fn set_instruction_fetch(&mut self) -> Result<()> {
        self.cable.ir_shift(IR_CNTRL_SIG_CAPTURE);

        for _ in 0..50 {
            if self.cable.dr_shift_16_read(0x0000) & 0x0080 == 0x0080 {
                return Ok(());
            }

            // a TCLK pulse between attempts; without it quick-access reads
            // misbehave afterwards (SLAU265)
            self.cable.tclk(false);
            self.cable.tclk(true);
        }

        error!("set_instruction_fetch: failed");
        self.fail();
        Err(Error::FetchTimeout)
    }

    /// Set the CPU into a controlled stop state.
    fn halt_cpu(&mut self) -> Result<()> {
        self.set_instruction_fetch()?;

        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);

        // feed a "jmp $" so the CPU spins in place
        self.cable.ir_shift(IR_DATA_16BIT);
        self.cable.dr_shift_16(0x3FFF);
        self.cable.tclk(true);
        self.cable.tclk(false);

        // raise the HALT bit
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2409);
        self.cable.tclk(true);

        Ok(())
    }

    /// Release the CPU from the controlled stop state.
    fn release_cpu(&mut self) {
        self.cable.tclk(false);

        // drop the HALT bit and resynchronize on the address bus
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);
        self.cable.ir_shift(IR_ADDR_CAPTURE);
        self.cable.tclk(true);
        self.cable.flush_writes();
    }

    /// Read one byte or word from `address`.
    pub fn read_mem(&mut self, format: Format, address: u16) -> Result<u16> {
        self.halt_cpu()?;
        self.cable.tclk(false);
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        match format {
            Format::Word => self.cable.dr_shift_16(0x2409),
            Format::Byte => self.cable.dr_shift_16(0x2419),
        }
        self.cable.ir_shift(IR_ADDR_16BIT);
        self.cable.dr_shift_16(address);
        self.cable.ir_shift(IR_DATA_TO_ADDR);
        self.cable.tclk(true);
        self.cable.tclk(false);

        let mut content = self.cable.dr_shift_16_read(0x0000);
        self.cable.tclk(true);
        self.release_cpu();
        if format == Format::Byte {
            content &= 0x00FF;
        }

        Ok(content)
    }

    /// Write one byte or word to `address`.
    pub fn write_mem(&mut self, format: Format, address: u16, data: u16) -> Result<()> {
        self.halt_cpu()?;
        self.cable.tclk(false);
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        match format {
            Format::Word => self.cable.dr_shift_16(0x2408),
            Format::Byte => self.cable.dr_shift_16(0x2418),
        }
        self.cable.ir_shift(IR_ADDR_16BIT);
        self.cable.dr_shift_16(address);
        self.cable.ir_shift(IR_DATA_TO_ADDR);
        self.cable.dr_shift_16(data);
        self.cable.tclk(true);
        self.release_cpu();

        Ok(())
    }

    /// Read `length` words starting at `address` in quick mode.  The
    /// target's internal pointer auto-increments, so the address is shifted
    /// only once.
    pub fn read_mem_quick(&mut self, address: u16, length: usize) -> Result<Vec<u16>> {
        // R0 seeds the auto-incrementing pointer
        self.write_reg(0, address.wrapping_sub(4))?;
        self.halt_cpu()?;
        self.cable.tclk(false);

        // read mode
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2409);
        self.cable.ir_shift(IR_DATA_QUICK);

        let mut data = Vec::with_capacity(length);
        for _ in 0..length {
            self.cable.tclk(true);
            self.cable.tclk(false);
            data.push(self.cable.dr_shift_16_read(0x0000));
        }

        self.cable.tclk(true);
        self.release_cpu();
        Ok(data)
    }

    /// Write `data` into target memory starting at `address` in quick mode.
    pub fn write_mem_quick(&mut self, address: u16, data: &[u16]) -> Result<()> {
        // R0 seeds the auto-incrementing pointer
        self.write_reg(0, address.wrapping_sub(4))?;
        self.halt_cpu()?;
        self.cable.tclk(false);

        // write mode
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2408);
        self.cable.ir_shift(IR_DATA_QUICK);

        for &word in data {
            self.cable.dr_shift_16(word);

            // the TCLK pulse advances the pointer by 2
            self.cable.tclk(true);
            self.cable.tclk(false);
        }

        self.cable.tclk(true);
        self.release_cpu();
        Ok(())
    }

    /// Read CPU register `reg`.
    ///
    /// A substituted `mov Rn,&0x01FE` puts the register's content on the
    /// data bus: the destination is a ROM address, so the write has no
    /// effect, but the value is visible through the data capture register.
    pub fn read_reg(&mut self, reg: u8) -> Result<u16> {
        self.set_instruction_fetch()?;

        // CPU controls RW & BYTE
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x3401);

        self.cable.ir_shift(IR_DATA_16BIT);

        // "jmp $-4" re-executes the same fetch, two TCLK cycles
        self.cable.dr_shift_16(0x3FFD);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);

        // "mov Rn,&0x01FE"
        self.cable.dr_shift_16(0x4082 | ((reg as u16) << 8 & 0x0F00));
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.dr_shift_16(0x01FE);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);
        // No further TCLK cycle here.  One more puts the next instruction
        // word on the data bus instead of the register value on G2-series
        // parts; the remaining cycles of the mov belong after the capture.

        // the data bus now carries the register's value
        self.cable.ir_shift(IR_DATA_CAPTURE);
        let value = self.cable.dr_shift_16_read(0x0000);

        self.cable.tclk(false);

        // JTAG controls RW & BYTE again
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);

        self.cable.tclk(true);

        Ok(value)
    }

    /// Write `value` into CPU register `reg` by substituting a
    /// `mov #value,Rn` instruction.
    pub fn write_reg(&mut self, reg: u8, value: u16) -> Result<()> {
        self.set_instruction_fetch()?;

        // CPU controls RW & BYTE
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x3401);

        self.cable.ir_shift(IR_DATA_16BIT);

        // "jmp $-4" re-executes the same fetch, two TCLK cycles
        self.cable.dr_shift_16(0x3FFD);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);

        // "mov #value,Rn", two TCLK cycles
        self.cable.dr_shift_16(0x4030 | (reg as u16 & 0x000F));
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.dr_shift_16(value);
        self.cable.tclk(false);
        self.cable.tclk(true);

        // JTAG controls RW & BYTE again
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);
        self.cable.flush_writes();

        Ok(())
    }

    /// Clock the CPU until the next instruction fetch cycle.
    pub fn single_step(&mut self) -> Result<()> {
        // CPU controls RW & BYTE
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x3401);

        // ten cycles covers the longest instruction
        self.cable.ir_shift(IR_CNTRL_SIG_CAPTURE);
        let mut fetched = false;
        for _ in 0..10 {
            self.cable.tclk(false);
            self.cable.tclk(true);
            if self.cable.dr_shift_16_read(0x0000) & 0x0080 == 0x0080 {
                fetched = true;
                break;
            }
        }

        // reassert bus control whether the step worked or not
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);
        self.cable.flush_writes();

        if !fetched {
            error!("single step timed out");
            self.fail();
            return Err(Error::StepTimeout);
        }

        Ok(())
    }

    /// Report whether the CPU is halted, without blocking or retrying.
    pub fn cpu_state(&mut self) -> CpuState {
        self.cable.ir_shift(IR_EMEX_READ_CONTROL);

        if self.cable.dr_shift_16_read(0x0000) & 0x0080 == 0x0080 {
            CpuState::Halted
        } else {
            CpuState::Running
        }
    }

    /// Release the target from JTAG control.
    ///
    /// `address` selects what runs: [`RUN_FROM_PC`] resumes at the current
    /// PC, [`RUN_FROM_RESET`] clears all breakpoints and issues a controlled
    /// reset, and any other value is loaded into the PC first.  The EEM
    /// reaction and control registers are parked in all cases.
    pub fn release_device(&mut self, address: u16) -> Result<()> {
        self.cable.led_green(false);

        match address {
            RUN_FROM_PC => {}
            RUN_FROM_RESET => {
                self.set_breakpoint(-1, 0)?;
                self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
                self.cable.dr_shift_16(0x2C01);
                self.cable.dr_shift_16(0x2401);
            }
            _ => self.write_reg(0, address)?,
        }

        self.set_instruction_fetch()?;

        self.cable.ir_shift(IR_EMEX_DATA_EXCHANGE);
        self.cable.dr_shift_16(BREAKREACT + READ);
        self.cable.dr_shift_16(0x0000);

        self.cable.ir_shift(IR_EMEX_WRITE_CONTROL);
        self.cable.dr_shift_16(0x000F);

        self.cable.ir_shift(IR_CNTRL_SIG_RELEASE);
        self.cable.flush_writes();
        Ok(())
    }

    /// Verify `data` against target memory starting at `start_address` using
    /// the pseudo signature analysis hardware.
    pub fn verify_mem(&mut self, start_address: u16, data: &[u16]) -> Result<()> {
        self.verify_psa(start_address, data.len(), Some(data))
    }

    /// Check that `length` words starting at `start_address` are erased.
    pub fn erase_check(&mut self, start_address: u16, length: usize) -> Result<()> {
        self.verify_psa(start_address, length, None)
    }

    /// Compare a locally computed PSA value to the one accumulated by the
    /// target.  `data == None` checks against the erased pattern instead.
    fn verify_psa(&mut self, start_address: u16, length: usize, data: Option<&[u16]>) -> Result<()> {
        // LFSR polynomial of the PSA hardware; seeded with the word before
        // the range
        const POLYNOM: u16 = 0x0805;
        let mut psa_crc = start_address.wrapping_sub(2);

        self.execute_puc()?;
        self.cable.ir_shift(IR_CNTRL_SIG_16BIT);
        self.cable.dr_shift_16(0x2401);
        self.set_instruction_fetch()?;
        self.cable.ir_shift(IR_DATA_16BIT);
        self.cable.dr_shift_16(0x4030);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.dr_shift_16(start_address.wrapping_sub(2));
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.tclk(true);
        self.cable.tclk(false);
        self.cable.ir_shift(IR_ADDR_CAPTURE);
        self.cable.dr_shift_16(0x0000);
        self.cable.ir_shift(IR_DATA_PSA);

        for index in 0..length {
            if psa_crc & 0x8000 == 0x8000 {
                psa_crc ^= POLYNOM;
                psa_crc = psa_crc.wrapping_shl(1) | 0x0001;
            } else {
                psa_crc = psa_crc.wrapping_shl(1);
            }

            match data {
                Some(data) => psa_crc ^= data[index],
                // erase check folds in the erased pattern instead
                None => psa_crc ^= 0xFFFF,
            }

            // advance the target's accumulator in lockstep
            self.cable.tclk(true);

            // six TMS clocks (1 0 0 1 1 0) walk the DR path without
            // shifting any data
            self.cable.tms_sequence(6, 0x19);

            self.cable.tclk(false);
        }

        // shift out what the target accumulated
        self.cable.ir_shift(IR_SHIFT_OUT_PSA);
        let psa_value = self.cable.dr_shift_16_read(0x0000);
        self.cable.tclk(true);

        if psa_value != psa_crc {
            error!(
                "psa verify failed at {:#06x}: expected {:#06x}, found {:#06x}",
                start_address, psa_crc, psa_value
            );
            self.fail();
            return Err(Error::VerifyMismatch {
                expected: psa_crc,
                found: psa_value,
            });
        }

        Ok(())
    }

    /// Read the configuration fuses.
    pub fn get_config_fuses(&mut self) -> u8 {
        self.cable.ir_shift(IR_CONFIG_FUSES);
        self.cable.dr_shift_8_read(0)
    }
}
