mod common;

use common::SimTarget;
use msp430_jtag::flash::{EraseMode, FLASH_CODE_PREAMBLE_LEN, FLASH_CODE_RAM_START};
use msp430_jtag::jtag::{Error, Jtag};

#[test]
fn program_verify_and_trap_out_the_loader() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let data: Vec<u16> = (0..64u16).map(|i| 0x1234_u16.wrapping_mul(i + 1)).collect();
    jtag.write_flash(0x8000, &data).unwrap();
    assert!(!jtag.failed());

    // the words really landed in flash
    assert_eq!(jtag.cable.read_word(0x8000), data[0]);
    assert_eq!(jtag.cable.read_word(0x8000 + 126), data[63]);

    jtag.fast_verify_mem(0x8000, &data).unwrap();
    assert!(!jtag.failed());

    // no executable residue: the whole scratch preamble is jmp-$ traps
    let residue = jtag
        .read_mem_quick(FLASH_CODE_RAM_START, FLASH_CODE_PREAMBLE_LEN / 2)
        .unwrap();
    assert!(residue.iter().all(|&w| w == 0x3FFF));
}

#[test]
fn fast_verify_detects_corruption() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let data: Vec<u16> = (0..16u16).map(|i| 0xBEEF ^ i).collect();
    jtag.write_flash(0x8000, &data).unwrap();

    let mut wrong = data.clone();
    wrong[3] = !wrong[3];
    assert!(matches!(
        jtag.fast_verify_mem(0x8000, &wrong),
        Err(Error::VerifyMismatch { .. })
    ));
    assert!(jtag.failed());
}

#[test]
fn full_erases_force_the_dummy_address() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    jtag.erase_flash(EraseMode::Mass, 0x1234).unwrap();
    jtag.erase_flash(EraseMode::Main, 0x4444).unwrap();
    assert_eq!(jtag.cable.erase_calls[0], (0, 0xFC10));
    assert_eq!(jtag.cable.erase_calls[1], (1, 0xFC10));

    // flash reads erased afterwards
    assert_eq!(jtag.cable.read_word(0xC000), 0xFFFF);
    jtag.erase_check(0xC000, 32).unwrap();
}

#[test]
fn segment_erase_keeps_the_callers_address() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    jtag.erase_flash(EraseMode::Segment, 0xFA10).unwrap();
    assert_eq!(jtag.cable.erase_calls[0], (2, 0xFA10));
    assert_eq!(jtag.cable.read_word(0xFA00), 0xFFFF);
}

#[test]
fn erase_timeout_marks_the_session_failed() {
    let mut sim = SimTarget::new();
    sim.hang_flash = true;
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    assert_eq!(
        jtag.erase_flash(EraseMode::Segment, 0xF000),
        Err(Error::FlashTimeout)
    );
    assert!(jtag.failed());

    // the engine waited out the documented window, nothing more
    assert_eq!(jtag.cable.delay_total_ms, 26);
}

#[test]
fn write_timeout_marks_the_session_failed() {
    let mut sim = SimTarget::new();
    sim.hang_flash = true;
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let data = [0x1111u16, 0x2222, 0x3333];
    assert_eq!(jtag.write_flash(0x8000, &data), Err(Error::FlashTimeout));
    assert!(jtag.failed());
}
