//! Hardware adapters implement the `Cable` trait, which exposes the raw JTAG
//! lines of an MSP430 target together with optional accelerated shift
//! operations.  The default methods drive the TAP bit by bit through the
//! line primitives; adapters with native shift or batching support override
//! them.
pub mod gpio;
#[cfg(feature = "std")]
pub mod ftdi;

/// Shift a value out on TDI (MSB first) while sampling TDO into the same bit
/// positions.  Expects the TAP to be in Shift-IR or Shift-DR; raises TMS on
/// the final bit and walks Exit1 -> Update back to Run-Test/Idle.  TCLK is
/// restored to its value from before the shift.
fn shift<C: Cable + ?Sized>(cable: &mut C, num_bits: u8, data_out: u16) -> u16 {
    let tclk_save = cable.tclk_get();

    let mut data_in = 0;
    let mut mask = 1u16 << (num_bits - 1);
    while mask != 0 {
        cable.tdi(data_out & mask != 0);

        if mask == 1 {
            cable.tms(true);
        }

        cable.tck(false);
        cable.tck(true);

        if cable.tdo() {
            data_in |= mask;
        }
        mask >>= 1;
    }

    cable.tclk(tclk_save);

    // Exit1 -> Update
    cable.tck(false);
    cable.tck(true);

    // Update -> Run-Test/Idle
    cable.tms(false);
    cable.tck(false);
    cable.tck(true);

    data_in
}

/// Line-level access to a JTAG adapter wired to an MSP430 target.
///
/// Only the signal primitives are required.  Everything else has a default
/// implementation built from them: the TAP reset and entry sequences, and
/// the IR/DR shifts.  The `*_read` shifts capture TDO; the plain variants
/// may be overridden by adapters that can queue write-only traffic, in which
/// case `flush_writes` commits anything still buffered.
pub trait Cable {
    fn tms(&mut self, value: bool);
    fn tck(&mut self, value: bool);
    fn tdi(&mut self, value: bool);
    /// TCLK is the target CPU clock, fed through the TDI pin while the TAP
    /// sits in Run-Test/Idle.
    fn tclk(&mut self, value: bool);
    fn rst(&mut self, value: bool);
    fn tst(&mut self, value: bool);
    fn tdo(&mut self) -> bool;
    fn tclk_get(&mut self) -> bool;

    /// Block for at least `ms` milliseconds.  Owned by the adapter so the
    /// protocol layers stay independent of any particular clock source.
    fn delay_ms(&mut self, ms: u32);

    fn power_on(&mut self) {}
    fn connect(&mut self) {}
    fn led_green(&mut self, _on: bool) {}
    fn led_red(&mut self, _on: bool) {}

    /// Commit any buffered line changes to the hardware.  Adapters that
    /// write through immediately can leave this as a no-op.
    fn flush_writes(&mut self) {}

    /// Reset the target TAP and perform the fuse-HW check, leaving the state
    /// machine in Run-Test/Idle.
    fn reset_tap(&mut self) {
        self.tms(true);
        self.tck(true);

        // fuse check: TMS toggles while TCK stays high
        self.tms(false);
        self.tms(true);
        self.tms(false);
        self.tms(true);

        // six cycles with TMS high reset the state machine
        for _ in 0..6 {
            self.tck(false);
            self.tck(true);
        }

        // drop into Run-Test/Idle
        self.tck(false);
        self.tms(false);
        self.tck(true);

        self.flush_writes();
    }

    /// Power-on entry sequence: raise the test signals in the documented
    /// order and reset the TAP.
    fn init_dap(&mut self) {
        self.rst(false);
        self.power_on();
        self.tdi(true);
        self.tms(true);
        self.tck(true);
        self.tclk(true);

        self.rst(true);
        self.tst(false);

        self.tst(true);
        self.rst(false);
        self.tst(false);

        self.tst(true);

        self.connect();
        self.rst(true);
        self.reset_tap();
    }

    /// Shift an 8-bit instruction into the IR, returning the captured IR
    /// value (the JTAG version/id byte on this family).
    fn ir_shift_read(&mut self, instruction: u8) -> u8 {
        // Run-Test/Idle -> Select DR-Scan
        self.tms(true);
        self.tck(false);
        self.tck(true);

        // -> Select IR-Scan
        self.tck(false);
        self.tck(true);

        // -> Capture-IR
        self.tms(false);
        self.tck(false);
        self.tck(true);

        // -> Shift-IR
        self.tck(false);
        self.tck(true);

        shift(self, 8, instruction as u16) as u8
    }

    /// Shift an 8-bit value through the DR, returning the captured value.
    fn dr_shift_8_read(&mut self, data: u8) -> u8 {
        // Run-Test/Idle -> Select DR-Scan
        self.tms(true);
        self.tck(false);
        self.tck(true);

        // -> Capture-DR
        self.tms(false);
        self.tck(false);
        self.tck(true);

        // -> Shift-DR
        self.tck(false);
        self.tck(true);

        shift(self, 8, data as u16) as u8
    }

    /// Shift a 16-bit value through the DR, returning the captured value.
    fn dr_shift_16_read(&mut self, data: u16) -> u16 {
        // Run-Test/Idle -> Select DR-Scan
        self.tms(true);
        self.tck(false);
        self.tck(true);

        // -> Capture-DR
        self.tms(false);
        self.tck(false);
        self.tck(true);

        // -> Shift-DR
        self.tck(false);
        self.tck(true);

        shift(self, 16, data)
    }

    /// Write-only IR shift.  Adapters that batch output traffic override
    /// this to skip TDO sampling; behaviour is otherwise identical to
    /// `ir_shift_read`.
    fn ir_shift(&mut self, instruction: u8) {
        self.ir_shift_read(instruction);
    }

    /// Write-only 8-bit DR shift.
    fn dr_shift_8(&mut self, data: u8) {
        self.dr_shift_8_read(data);
    }

    /// Write-only 16-bit DR shift.
    fn dr_shift_16(&mut self, data: u16) {
        self.dr_shift_16_read(data);
    }

    /// Clock `bits` TMS values out of `pattern`, LSB first, without shifting
    /// any data.  Used to walk the TAP through the DR path during PSA
    /// accumulation.
    fn tms_sequence(&mut self, bits: u8, pattern: u16) {
        for i in 0..bits {
            self.tck(false);
            self.tms(pattern & (1 << i) != 0);
            self.tck(true);
        }
    }
}
