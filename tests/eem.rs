mod common;

use common::SimTarget;
use msp430_jtag::eem::{
    Breakpoint, BreakpointType, BREAKREACT, CMP_EQUAL, GENCTRL, MAB, MBTRIGX_CMB, MBTRIGX_CTL,
    MBTRIGX_MSK, MBTRIGX_VAL, NO_MASK, TRIG_0,
};
use msp430_jtag::jtag::{Error, Jtag};

#[test]
fn breakpoints_program_trigger_blocks_and_reaction_mask() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    jtag.set_breakpoint(0, 0xF000).unwrap();
    assert_eq!(jtag.cable.eem_reg(MBTRIGX_VAL), 0xF000);
    assert_eq!(jtag.cable.eem_reg(MBTRIGX_CTL), MAB + TRIG_0 + CMP_EQUAL);
    assert_eq!(jtag.cable.eem_reg(MBTRIGX_MSK), NO_MASK);
    assert_eq!(jtag.cable.eem_reg(MBTRIGX_CMB), 1 << 0);
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0b0000_0001);
    assert_ne!(jtag.cable.eem_reg(GENCTRL), 0);

    jtag.set_breakpoint(3, 0xE000).unwrap();
    assert_eq!(jtag.cable.eem_reg(8 * 3 + MBTRIGX_VAL), 0xE000);
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0b0000_1001);

    // negative slot: disable everything
    jtag.set_breakpoint(-1, 0).unwrap();
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0x0000);
}

#[test]
fn slot_out_of_range_is_rejected_before_any_write() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    assert_eq!(jtag.set_breakpoint(8, 0x1234), Err(Error::BadBreakpoint(8)));
    assert!(jtag.failed());

    // nothing was touched
    assert_eq!(jtag.cable.eem_reg(GENCTRL), 0);
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0);
}

#[test]
fn refresh_programs_dirty_entries_and_clears_their_flag() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let mut table = [Breakpoint::none(); 4];
    table[0] = Breakpoint {
        bp_type: BreakpointType::Break,
        addr: 0xF000,
        enabled: true,
        dirty: true,
    };
    table[1] = Breakpoint {
        bp_type: BreakpointType::Break,
        addr: 0xE000,
        enabled: false,
        dirty: true,
    };
    // not a breakpoint: must stay dirty and untouched
    table[2].dirty = true;
    // clean breakpoint: must not be reprogrammed
    table[3] = Breakpoint {
        bp_type: BreakpointType::Break,
        addr: 0xD000,
        enabled: true,
        dirty: false,
    };

    jtag.refresh_breakpoints(&mut table).unwrap();

    assert!(!table[0].dirty);
    assert!(!table[1].dirty);
    assert!(table[2].dirty);

    assert_eq!(jtag.cable.eem_reg(MBTRIGX_VAL), 0xF000);
    // disabled entries are programmed with address 0
    assert_eq!(jtag.cable.eem_reg(8 + MBTRIGX_VAL), 0x0000);
    // slot 3 was never touched
    assert_eq!(jtag.cable.eem_reg(8 * 3 + MBTRIGX_VAL), 0x0000);
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0b0000_0011);
}

#[test]
fn refresh_continues_past_a_failing_slot() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let mut table = [Breakpoint {
        bp_type: BreakpointType::Break,
        addr: 0xC000,
        enabled: true,
        dirty: true,
    }; 9];

    // slot 8 does not exist in hardware
    assert_eq!(
        jtag.refresh_breakpoints(&mut table),
        Err(Error::BadBreakpoint(8))
    );
    assert!(jtag.failed());

    for entry in &table[..8] {
        assert!(!entry.dirty);
    }
    assert!(table[8].dirty);
    assert_eq!(jtag.cable.eem_reg(BREAKREACT), 0b1111_1111);
}
