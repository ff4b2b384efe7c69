//! Flash erase, program and verify through small routines executed from the
//! target's own RAM.
//!
//! All three operations follow one pattern: build a parameter block, upload
//! it together with the routine's code via quick write, start the CPU at the
//! routine entry, wait out a measured worst-case duration while the target
//! runs on its own, re-seize the CPU and read the block back.  A parameter
//! block that still reports "pending" after the wait is a hard timeout.  On
//! success the uploaded region is overwritten with `jmp $` traps so a stray
//! start cannot re-run stale code.
//!
//! The parameter blocks are the wire contract with the pre-compiled
//! routines; field offsets and widths are fixed by their ABI and serialized
//! at explicit byte offsets rather than through host structures.
use alloc::vec;
use alloc::vec::Vec;
use core::ops::DerefMut;

use log::error;

use crate::cable::Cable;
use crate::jtag::{Error, Format, Jtag, Result};

/// Start of the RAM window shared with the on-chip routines.  Every
/// supported device maps at least 2 KiB of RAM at 0x0200.
pub const FLASH_CODE_RAM_START: u16 = 0x0200;

// Write parameter block: wrt_len is the completion sentinel (0 = done),
// wrt_len_this is scratch for the routine itself.
const WRITE_WRT_LEN: usize = 0;
const WRITE_P_SRC: usize = 2;
const WRITE_P_DST: usize = 4;
const WRITE_HEADER_LEN: usize = 8;

// Erase parameter block: done is the completion sentinel (1 = done).
const ERASE_DONE: usize = 0;
const ERASE_TYPE: usize = 1;
const ERASE_SEGMENT_ADDR: usize = 2;
const ERASE_HEADER_LEN: usize = 4;

// Verify parameter block: data doubles as the completion sentinel
// (0 = done).
const VERIFY_DATA: usize = 0;
const VERIFY_LEN: usize = 2;
const VERIFY_CRC: usize = 4;
const VERIFY_HEADER_LEN: usize = 6;

/// Entry of the programming routine, directly past its parameter block.
pub const FLASH_CODE_START: u16 = FLASH_CODE_RAM_START + WRITE_HEADER_LEN as u16;
/// Staging buffer for the data of one programming block.
pub const FLASH_CODE_BLOCK_START: u16 = FLASH_CODE_START + FLASH_WRITE_CODE.len() as u16;
/// Bytes programmed per routine invocation.
pub const FLASH_CODE_BLOCK_LEN: usize = 512;
/// Length of the region to trap out after programming: header plus code,
/// but not the staging buffer.
pub const FLASH_CODE_PREAMBLE_LEN: usize = WRITE_HEADER_LEN + FLASH_WRITE_CODE.len();

/// Dummy write address used by the eraser for main and mass erases.
const ERASE_DUMMY_ADDR: u16 = 0xFC10;

// Raw bytes of the ".TI.bound:flash_erase" section of
// flash_eraser_onchip.elf, built with cl430 -vmsp --opt_level=4 against the
// F24x register layout and extracted with ofd430.  The routine owns its
// clock setup, performs the erase selected by the parameter block and
// signals completion through it; it uses neither the stack nor calls.
const FLASH_ERASE_CODE: &[u8] = &[
    0xC2, 0x93, 0x00, 0x02, 0xFD, 0x23, 0xD2, 0x42, 0xF9, 0x10, 0x57, 0x00,
    0xF2, 0x40, 0x20, 0x00, 0x53, 0x00, 0xD2, 0x42, 0xF8, 0x10, 0x56, 0x00,
    0xB2, 0x40, 0x6B, 0xA5, 0x2A, 0x01, 0xB2, 0xB3, 0x2C, 0x01, 0xFD, 0x23,
    0x5E, 0x42, 0x01, 0x02, 0x7E, 0x90, 0x02, 0x00, 0x03, 0x20, 0xB2, 0x40,
    0x02, 0xA5, 0x28, 0x01, 0x02, 0x3C, 0xB2, 0x40, 0x06, 0xA5, 0x28, 0x01,
    0x1F, 0x42, 0x02, 0x02, 0x8F, 0x43, 0x00, 0x00, 0xB2, 0xB3, 0x2C, 0x01,
    0xFD, 0x23, 0xB2, 0x40, 0x00, 0xA5, 0x28, 0x01, 0xB2, 0x40, 0x10, 0xA5,
    0x2C, 0x01, 0xD2, 0x43, 0x00, 0x02, 0xFF, 0x3F,
];

// Raw bytes of the ".TI.bound:flash_write" section of
// flash_loader_onchip.elf, same toolchain.  Loops forever: waits for a
// parameter block, programs it in 64-byte flash rows, clears the block and
// waits for the next one.
const FLASH_WRITE_CODE: &[u8] = &[
    0xB2, 0x40, 0x6B, 0xA5, 0x2A, 0x01, 0xB2, 0xB3, 0x2C, 0x01, 0xFD, 0x23,
    0x82, 0x93, 0x00, 0x02, 0x05, 0x20, 0x82, 0x93, 0x02, 0x02, 0x02, 0x20,
    0x82, 0x93, 0x04, 0x02, 0xF9, 0x27, 0xB2, 0x40, 0x00, 0xA5, 0x2C, 0x01,
    0x1F, 0x42, 0x04, 0x02, 0x3F, 0xF0, 0x3F, 0x00, 0x3E, 0x40, 0x40, 0x00,
    0x0E, 0x8F, 0x0E, 0x11, 0x82, 0x4E, 0x06, 0x02, 0x92, 0x92, 0x00, 0x02,
    0x06, 0x02, 0x03, 0x28, 0x92, 0x42, 0x00, 0x02, 0x06, 0x02, 0xB2, 0x40,
    0xC0, 0xA5, 0x28, 0x01, 0x1E, 0x42, 0x02, 0x02, 0x1F, 0x42, 0x04, 0x02,
    0xAF, 0x4E, 0x00, 0x00, 0x2E, 0x53, 0x2F, 0x53, 0xA2, 0xB2, 0x2C, 0x01,
    0xFD, 0x27, 0x92, 0x83, 0x00, 0x02, 0x92, 0x83, 0x06, 0x02, 0xF2, 0x23,
    0xB2, 0x40, 0x40, 0xA5, 0x28, 0x01, 0xB2, 0xB3, 0x2C, 0x01, 0xFD, 0x23,
    0x82, 0x93, 0x00, 0x02, 0xD8, 0x23, 0xB2, 0x40, 0x00, 0xA5, 0x28, 0x01,
    0xB2, 0x40, 0x10, 0xA5, 0x2C, 0x01, 0x82, 0x43, 0x02, 0x02, 0x82, 0x43,
    0x04, 0x02, 0x82, 0x43, 0x00, 0x02, 0xFF, 0x3F,
];

// Raw bytes of the ".TI.bound:flash_verify" section of
// flash_verifier_onchip.elf, same toolchain.  Computes the CRC16 below over
// the window named by the parameter block and reports it back.
const FLASH_VERIFY_CODE: &[u8] = &[
    0x82, 0x93, 0x00, 0x02, 0x02, 0x20, 0x82, 0x93, 0x02, 0x02, 0xF9, 0x27,
    0xB2, 0x40, 0xFF, 0xFF, 0x04, 0x02, 0x1E, 0x42, 0x00, 0x02, 0x82, 0x93,
    0x02, 0x02, 0x14, 0x24, 0x92, 0x83, 0x02, 0x02, 0x6F, 0x4E, 0x1E, 0x53,
    0x1D, 0x42, 0x04, 0x02, 0x8D, 0x10, 0x0F, 0xED, 0x4F, 0x4F, 0x0C, 0x4F,
    0x0C, 0x11, 0x0C, 0x11, 0x0C, 0x11, 0x0C, 0x11, 0x0F, 0xEC, 0x8D, 0x10,
    0x3D, 0xF0, 0x00, 0xFF, 0x0D, 0xEF, 0x0C, 0x4F, 0x0C, 0x5C, 0x0C, 0x5C,
    0x0C, 0x5C, 0x0C, 0x5C, 0x0C, 0x5C, 0x0D, 0xEC, 0x0C, 0x5C, 0x0C, 0x5C,
    0x0C, 0x5C, 0x0C, 0x5C, 0x0C, 0x5C, 0x0C, 0x5C, 0x0C, 0x5C, 0x0D, 0xEC,
    0x82, 0x4D, 0x04, 0x02, 0xEA, 0x3F, 0x82, 0x43, 0x02, 0x02, 0x82, 0x43,
    0x00, 0x02, 0xFF, 0x3F,
];

/// Which parts of the flash to erase.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EraseMode {
    /// Main and information memory.
    Mass,
    /// Main memory only.
    Main,
    /// The single segment containing the given address.
    Segment,
}

/// A parameter block image under construction.  Fields land at explicit
/// byte offsets so the upload matches the routines' compiled layout
/// regardless of host alignment rules.
struct ParamBlock {
    bytes: Vec<u8>,
}

impl ParamBlock {
    fn new(header_len: usize) -> Self {
        Self {
            bytes: vec![0; header_len],
        }
    }

    fn put_u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn append_code(&mut self, code: &[u8]) {
        self.bytes.extend_from_slice(code);
    }

    fn words(&self) -> Vec<u16> {
        pack_words(&self.bytes)
    }
}

fn pack_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// CRC16 variant computed by the on-chip verify routine (seed 0xFFFF,
/// bit-reflected folding).
fn onchip_crc<I: IntoIterator<Item = u8>>(data: I) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for byte in data {
        let mut x = (crc >> 8) as u8 ^ byte;
        x ^= x >> 4;
        crc = (crc << 8) ^ ((x as u16) << 12) ^ ((x as u16) << 5) ^ x as u16;
    }

    crc
}

impl<T, U> Jtag<T>
where
    T: DerefMut<Target = U>,
    U: Cable + ?Sized,
{
    /// Perform a mass, main-only or segment erase using the on-chip
    /// routine, which removes any dependency on the programmer clock.
    /// `address` is only meaningful for segment erases; full erases force
    /// the dummy write into main memory.
    pub fn erase_flash(&mut self, mode: EraseMode, address: u16) -> Result<()> {
        self.cable.led_red(true);

        let (erase_type, segment_addr) = match mode {
            EraseMode::Mass => (0, ERASE_DUMMY_ADDR),
            EraseMode::Main => (1, ERASE_DUMMY_ADDR),
            EraseMode::Segment => (2, address),
        };

        let mut block = ParamBlock::new(ERASE_HEADER_LEN);
        block.put_u8(ERASE_DONE, 0);
        block.put_u8(ERASE_TYPE, erase_type);
        block.put_u16(ERASE_SEGMENT_ADDR, segment_addr);
        block.append_code(FLASH_ERASE_CODE);
        let image = block.words();

        self.write_mem_quick(FLASH_CODE_RAM_START, &image)?;

        self.release_device(FLASH_CODE_RAM_START + ERASE_HEADER_LEN as u16)?;

        if mode == EraseMode::Segment {
            // a segment takes 4819 flash clocks, 13 ms at 350 kHz; wait
            // twice that
            self.cable.delay_ms(26);
        } else {
            // a full erase takes 10593 flash clocks, 30 ms at 350 kHz;
            // wait twice that
            self.cable.delay_ms(60);
        }

        // take the CPU back
        self.get_device()?;

        let header = self.read_mem_quick(FLASH_CODE_RAM_START, ERASE_HEADER_LEN / 2)?;
        if header[ERASE_DONE / 2] & 0x00FF != 0x0001 {
            error!("flash erase did not complete in time; delay too short or chip is failing");
            self.fail();
            return Err(Error::FlashTimeout);
        }

        // overwrite the upload with jmp-$ traps
        let boom = vec![0x3FFF; image.len()];
        self.write_mem_quick(FLASH_CODE_RAM_START, &boom)?;

        self.cable.led_red(false);
        Ok(())
    }

    /// Program `data` into flash at `start_address` using the on-chip
    /// routine and the flash controller; the JTAG flash register is not
    /// involved.
    pub fn write_flash(&mut self, start_address: u16, data: &[u16]) -> Result<()> {
        let length = data.len() * 2;

        self.cable.led_red(true);

        // the routine is uploaded once and services one parameter block
        // per started run
        self.write_mem_quick(FLASH_CODE_START, &pack_words(FLASH_WRITE_CODE))?;

        let mut index = 0;
        while index < length {
            let this_block = (length - index).min(FLASH_CODE_BLOCK_LEN);
            let dst = start_address.wrapping_add(index as u16);

            // stage the block's data
            self.write_mem_quick(
                FLASH_CODE_BLOCK_START,
                &data[index / 2..(index + this_block) / 2],
            )?;

            // parameters; wrt_len_this is scratch for the routine
            let mut header = ParamBlock::new(WRITE_HEADER_LEN);
            header.put_u16(WRITE_WRT_LEN, (this_block / 2) as u16);
            header.put_u16(WRITE_P_SRC, FLASH_CODE_BLOCK_START);
            header.put_u16(WRITE_P_DST, dst);
            self.write_mem_quick(FLASH_CODE_RAM_START, &header.words())?;

            self.release_device(FLASH_CODE_START)?;

            // Reading back while the routine runs corrupts the write, so
            // wait out the measured worst case: about 36 KB/s, with 50 ms
            // of slack on top.
            self.cable.delay_ms(50 + this_block as u32 / 36);

            // take the CPU back
            self.get_device()?;

            if self.read_mem(Format::Word, FLASH_CODE_RAM_START)? != 0x0000 {
                let words = self.read_mem_quick(FLASH_CODE_RAM_START, WRITE_HEADER_LEN / 2)?;
                let p_dst = words[WRITE_P_DST / 2];
                let bytes_written = p_dst.wrapping_sub(dst) as usize;

                error!(
                    "flash write timed out at {}% dst={:#06x} src={:#06x} len={}",
                    bytes_written * 100 / this_block,
                    p_dst,
                    words[WRITE_P_SRC / 2],
                    words[WRITE_WRT_LEN / 2],
                );
                self.fail();
                return Err(Error::FlashTimeout);
            }

            index += this_block;
        }

        // overwrite the upload with jmp-$ traps
        let boom = vec![0x3FFF; FLASH_CODE_PREAMBLE_LEN / 2];
        self.write_mem_quick(FLASH_CODE_RAM_START, &boom)?;

        self.cable.led_red(false);
        Ok(())
    }

    /// Verify `data` against flash at `start_address` by letting the
    /// on-chip routine compute a CRC over the flash contents and comparing
    /// it with a locally computed one.  The data never travels back over
    /// JTAG.
    pub fn fast_verify_mem(&mut self, start_address: u16, data: &[u16]) -> Result<()> {
        let length = data.len() * 2;
        let expected_crc = onchip_crc(data.iter().flat_map(|w| w.to_le_bytes()));

        self.cable.led_green(true);

        let mut block = ParamBlock::new(VERIFY_HEADER_LEN);
        block.put_u16(VERIFY_DATA, start_address);
        block.put_u16(VERIFY_LEN, length as u16);
        block.append_code(FLASH_VERIFY_CODE);
        let image = block.words();

        self.write_mem_quick(FLASH_CODE_RAM_START, &image)?;

        self.release_device(FLASH_CODE_RAM_START + VERIFY_HEADER_LEN as u16)?;

        // measured at about 160 KB/s; 20 ms (~3 KB) of slack on top
        self.cable.delay_ms(20 + length as u32 / 160);

        // take the CPU back
        self.get_device()?;

        let header = self.read_mem_quick(FLASH_CODE_RAM_START, VERIFY_HEADER_LEN / 2)?;
        if header[VERIFY_DATA / 2] != 0x0000 {
            error!(
                "flash verify timed out at {:#06x} remaining={}",
                header[VERIFY_DATA / 2],
                header[VERIFY_LEN / 2],
            );
            self.fail();
            return Err(Error::FlashTimeout);
        }

        // overwrite the upload with jmp-$ traps
        let boom = vec![0x3FFF; image.len()];
        self.write_mem_quick(FLASH_CODE_RAM_START, &boom)?;

        self.cable.led_green(false);

        let crc = header[VERIFY_CRC / 2];
        if crc != expected_crc {
            error!(
                "flash verify failed, expected CRC {:#06x} got {:#06x}",
                expected_crc, crc
            );
            self.fail();
            return Err(Error::VerifyMismatch {
                expected: expected_crc,
                found: crc,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_nothing_is_the_seed() {
        assert_eq!(onchip_crc([]), 0xFFFF);
    }

    #[test]
    fn crc_reference_vector() {
        assert_eq!(onchip_crc([0x01, 0x02, 0x03, 0x04]), 0x89C3);
    }

    #[test]
    fn crc_over_words_matches_crc_over_bytes() {
        let words = [0x0201u16, 0x0403];
        let bytes = words.iter().flat_map(|w| w.to_le_bytes());
        assert_eq!(onchip_crc(bytes), onchip_crc([0x01, 0x02, 0x03, 0x04]));
    }

    #[test]
    fn code_regions_are_disjoint_and_fit_in_ram() {
        assert_eq!(FLASH_CODE_START, 0x0208);
        assert_eq!(
            FLASH_CODE_BLOCK_START,
            FLASH_CODE_START + FLASH_WRITE_CODE.len() as u16
        );
        assert!(FLASH_CODE_BLOCK_START as usize + FLASH_CODE_BLOCK_LEN <= 0x0A00);
    }

    #[test]
    fn routine_images_are_word_sized() {
        assert_eq!(FLASH_ERASE_CODE.len() % 2, 0);
        assert_eq!(FLASH_WRITE_CODE.len() % 2, 0);
        assert_eq!(FLASH_VERIFY_CODE.len() % 2, 0);
    }

    #[test]
    fn erase_block_layout() {
        let mut block = ParamBlock::new(ERASE_HEADER_LEN);
        block.put_u8(ERASE_DONE, 0);
        block.put_u8(ERASE_TYPE, 2);
        block.put_u16(ERASE_SEGMENT_ADDR, 0xFA00);
        assert_eq!(block.bytes, [0x00, 0x02, 0x00, 0xFA]);
        assert_eq!(block.words(), [0x0200, 0xFA00]);
    }

    #[test]
    fn write_header_layout() {
        let mut header = ParamBlock::new(WRITE_HEADER_LEN);
        header.put_u16(WRITE_WRT_LEN, 0x0102);
        header.put_u16(WRITE_P_SRC, 0x0304);
        header.put_u16(WRITE_P_DST, 0x0506);
        assert_eq!(header.words(), [0x0102, 0x0304, 0x0506, 0x0000]);
    }
}
