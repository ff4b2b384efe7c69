mod common;

use common::SimTarget;
use msp430_jtag::jtag::{CpuState, Error, Format, Jtag, JTAG_ID, RUN_FROM_RESET};

#[test]
fn init_identifies_device_and_disables_watchdog() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);

    assert_eq!(jtag.init().unwrap(), JTAG_ID);
    assert!(!jtag.failed());

    // PUC writes the watchdog hold key
    assert_eq!(jtag.cable.read_word(0x0120), 0x5A80);
}

#[test]
fn chip_id_swaps_the_stored_bytes() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);

    jtag.init().unwrap();
    assert_eq!(jtag.chip_id().unwrap(), 0xF249);
}

#[test]
fn blown_fuse_refuses_the_session() {
    let mut sim = SimTarget::new();
    sim.fuse_blown = true;
    let mut jtag = Jtag::new(&mut sim);

    assert_eq!(jtag.init(), Err(Error::FuseBlown));
    assert!(jtag.failed());
}

#[test]
fn device_sync_timeout_marks_the_session_failed() {
    let mut sim = SimTarget::new();
    sim.sync_never = true;
    let mut jtag = Jtag::new(&mut sim);

    assert_eq!(jtag.init(), Err(Error::SyncTimeout));
    assert!(jtag.failed());

    // the flag is sticky
    assert_eq!(jtag.get_device(), Err(Error::SyncTimeout));
    assert!(jtag.failed());
}

#[test]
fn registers_round_trip() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    for reg in 0..16u8 {
        let value = 0xA000 | (reg as u16) << 4 | 0x000C;
        jtag.write_reg(reg, value).unwrap();
        assert_eq!(jtag.read_reg(reg).unwrap(), value, "register {}", reg);
    }
    assert!(!jtag.failed());
}

#[test]
fn single_words_and_bytes_round_trip() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    jtag.write_mem(Format::Word, 0x1000, 0x1234).unwrap();
    assert_eq!(jtag.read_mem(Format::Word, 0x1000).unwrap(), 0x1234);

    // byte reads return only the addressed byte
    assert_eq!(jtag.read_mem(Format::Byte, 0x1000).unwrap(), 0x0034);
    assert_eq!(jtag.read_mem(Format::Byte, 0x1001).unwrap(), 0x0012);

    jtag.write_mem(Format::Byte, 0x1002, 0x00AB).unwrap();
    assert_eq!(jtag.read_mem(Format::Byte, 0x1002).unwrap(), 0x00AB);
}

#[test]
fn memory_blocks_round_trip() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let data: Vec<u16> = (0..64u16).map(|i| 0x5A00 ^ (i * 3)).collect();
    jtag.write_mem_quick(0x1100, &data).unwrap();

    // quick mode really hit the right addresses
    assert_eq!(jtag.cable.read_word(0x1100), data[0]);
    assert_eq!(jtag.cable.read_word(0x1100 + 126), data[63]);

    assert_eq!(jtag.read_mem_quick(0x1100, 64).unwrap(), data);
}

#[test]
fn instruction_fetch_sync_retries() {
    let mut sim = SimTarget::new();
    sim.fetch_delay = 8;
    let mut jtag = Jtag::new(&mut sim);

    jtag.init().unwrap();
    assert!(!jtag.failed());
}

#[test]
fn single_step_and_cpu_state() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    assert_eq!(jtag.cpu_state(), CpuState::Halted);
    jtag.single_step().unwrap();

    jtag.release_device(RUN_FROM_RESET).unwrap();
    assert_eq!(jtag.cpu_state(), CpuState::Running);

    // the reset path deleted all breakpoints
    assert_eq!(jtag.cable.eem_reg(0x0080), 0x0000);
}

#[test]
fn psa_verifies_memory_and_erasure() {
    let mut sim = SimTarget::new();
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    let data: Vec<u16> = (0..32u16).map(|i| 0xC3A5 ^ (i * 7)).collect();
    jtag.write_mem_quick(0x1200, &data).unwrap();
    jtag.verify_mem(0x1200, &data).unwrap();

    jtag.cable.fill(0x9000, 64, 0xFF);
    jtag.erase_check(0x9000, 32).unwrap();

    let mut wrong = data.clone();
    wrong[7] ^= 0x0100;
    assert!(matches!(
        jtag.verify_mem(0x1200, &wrong),
        Err(Error::VerifyMismatch { .. })
    ));
    assert!(jtag.failed());
}

#[test]
fn config_fuses_are_read_through_the_8bit_register() {
    let mut sim = SimTarget::new();
    sim.config_fuses = 0x03;
    let mut jtag = Jtag::new(&mut sim);
    jtag.init().unwrap();

    assert_eq!(jtag.get_config_fuses(), 0x03);
}
