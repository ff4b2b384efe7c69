//! This crate drives the JTAG debug interface of flash-based MSP430
//! microcontrollers.  At the lowest level, the `Cable` trait abstracts the
//! hardware adapter: anything that can move the six JTAG/test lines works,
//! from direct GPIO control to FTDI adapters in synchronous bitbang mode,
//! and adapters with native shift or batching support can override the
//! default bit-bang sequences.
//!
//! The `Jtag` session builds the protocol on top of a cable: device
//! identification and watchdog disable, halting and releasing the CPU,
//! single-stepping, register and memory access through the debug mailbox
//! tricks the silicon expects, and PSA-based bulk verification.  The `flash`
//! module programs, erases and verifies flash by running small routines out
//! of the target's own RAM, and `eem` manages the hardware breakpoints of
//! the Enhanced Emulation Module.
//!
//! # Example
//! ```no_run
//! use msp430_jtag::cable::ftdi::{Bitbang, D2xx, PinMap};
//! use msp430_jtag::jtag::{Jtag, RUN_FROM_RESET};
//!
//! let map = PinMap::default();
//! let cable = Bitbang::new(D2xx::open("Dual RS232-HS A", 500_000, map.output_mask()), map);
//! let mut jtag = Jtag::new(Box::new(cable));
//!
//! let id = jtag.init().expect("target did not respond");
//! println!("jtag id {:#04x}, chip {:#06x}", id, jtag.chip_id().expect("chip id"));
//!
//! jtag.release_device(RUN_FROM_RESET).expect("release");
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod cable;
pub mod eem;
pub mod flash;
pub mod jtag;
