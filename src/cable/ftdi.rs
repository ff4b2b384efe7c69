//! Implement the `Cable` trait for FTDI-based adapters in synchronous
//! bitbang mode.
//!
//! Pin changes are queued and sent to the adapter in batches; the chip
//! echoes one sample per written byte, which is how TDO is read back.  The
//! shift methods are overridden to build whole waveforms per shift, and the
//! write-only variants stay queued until something needs the wire, which is
//! worth an order of magnitude on USB full-speed adapters.
//!
//! Two byte transports are provided: the vendor D2XX driver and a raw
//! libusb client, so the same engine runs against whichever driver owns the
//! device.
use crate::cable::Cable;

use alloc::vec;
use alloc::vec::Vec;
use std::thread;
use std::time::Duration;

// FTDI vendor requests, as issued by libftdi
const SIO_RESET: u8 = 0x00;
const SIO_SET_BAUDRATE: u8 = 0x03;
const SIO_SET_BITMODE: u8 = 0x0B;
const BITMODE_SYNCBB: u16 = 0x04;
const FTDI_DEVICE_OUT_REQTYPE: u8 = 0x40;
const FTDI_OUT_EP: u8 = 0x02;
const FTDI_IN_EP: u8 = 0x81;

/// Bit positions of the JTAG signals on the adapter's data bus.
#[derive(Clone, Copy)]
pub struct PinMap {
    pub tck: u8,
    pub tdi: u8,
    pub tdo: u8,
    pub tms: u8,
    pub rst: u8,
    pub tst: u8,
}

impl PinMap {
    /// Bus bits that must be configured as outputs.
    pub fn output_mask(&self) -> u8 {
        1 << self.tck | 1 << self.tdi | 1 << self.tms | 1 << self.rst | 1 << self.tst
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            tck: 0,
            tdi: 1,
            tdo: 2,
            tms: 3,
            rst: 4,
            tst: 5,
        }
    }
}

/// Raw byte transport beneath the bitbang engine.  In synchronous bitbang
/// mode every written byte produces exactly one sampled byte to read back.
pub trait FtdiTransport {
    fn send(&mut self, buf: &[u8]);
    fn recv(&mut self, buf: &mut [u8]);
}

pub struct Bitbang<T> {
    ft: T,
    map: PinMap,
    /// Current output latch
    pins: u8,
    /// Queued pin states not yet sent to the adapter
    buffer: Vec<u8>,
    tclk: bool,
}

impl<T: FtdiTransport> Bitbang<T> {
    pub fn new(ft: T, map: PinMap) -> Self {
        Self {
            ft,
            map,
            pins: 0,
            buffer: vec![],
            tclk: false,
        }
    }

    /// Send the queue and read back the echoed samples.
    fn commit(&mut self) -> Vec<u8> {
        if self.buffer.is_empty() {
            return vec![];
        }
        self.ft.send(&self.buffer);
        let mut recv = vec![0; self.buffer.len()];
        self.ft.recv(&mut recv);
        self.buffer.clear();
        recv
    }

    /// Flush queued write-only traffic if `extra` more bytes would overrun
    /// the adapter-side buffer.
    fn reserve(&mut self, extra: usize) {
        if self.buffer.len() + extra > 4096 {
            self.commit();
        }
    }

    fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.pins |= 1 << bit;
        } else {
            self.pins &= !(1 << bit);
        }
        self.buffer.push(self.pins);
    }

    /// Queue one TCK cycle, leaving TDI untouched.
    fn cycle_tms(&mut self, tms: bool) {
        self.set(self.map.tms, tms);
        self.set(self.map.tck, false);
        self.set(self.map.tck, true);
    }

    /// Queue one TCK cycle with a TDI data bit, returning the queue index
    /// whose echoed sample holds TDO for this bit.
    fn cycle_data(&mut self, tms: bool, tdi: bool) -> usize {
        self.set(self.map.tdi, tdi);
        self.set(self.map.tms, tms);
        self.set(self.map.tck, false);
        self.set(self.map.tck, true);
        self.buffer.len() - 1
    }

    /// Queue the walk from Run-Test/Idle into Shift-IR or Shift-DR.
    fn enter_shift(&mut self, ir: bool) {
        self.cycle_tms(true);
        if ir {
            self.cycle_tms(true);
        }
        self.cycle_tms(false);
        self.cycle_tms(false);
    }

    /// Queue a full shift: `num_bits` of `data_out` MSB first, the TCLK
    /// restore and the Exit1 -> Update -> Run-Test/Idle epilogue.  With
    /// `capture` the queue is committed and the TDO bits are extracted;
    /// otherwise everything stays queued.
    fn shift(&mut self, num_bits: u8, data_out: u16, capture: bool) -> u16 {
        let mut samples = Vec::with_capacity(num_bits as usize);

        let mut mask = 1u16 << (num_bits - 1);
        while mask != 0 {
            let index = self.cycle_data(mask == 1, data_out & mask != 0);
            samples.push((index, mask));
            mask >>= 1;
        }

        // restore TCLK, which rode on the TDI pin during the shift
        self.set(self.map.tdi, self.tclk);

        // Exit1 -> Update -> Run-Test/Idle
        self.cycle_tms(true);
        self.cycle_tms(false);

        if !capture {
            return 0;
        }

        let recv = self.commit();
        let mut data_in = 0;
        for (index, mask) in samples {
            if recv[index] & (1 << self.map.tdo) != 0 {
                data_in |= mask;
            }
        }
        data_in
    }
}

impl<T: FtdiTransport> Cable for Bitbang<T> {
    fn tms(&mut self, value: bool) {
        self.reserve(1);
        self.set(self.map.tms, value);
    }

    fn tck(&mut self, value: bool) {
        self.reserve(1);
        self.set(self.map.tck, value);
    }

    fn tdi(&mut self, value: bool) {
        self.reserve(1);
        self.set(self.map.tdi, value);
    }

    fn tclk(&mut self, value: bool) {
        // The target clock is the TDI pin while the TAP is in Run-Test/Idle
        self.reserve(1);
        self.tclk = value;
        self.set(self.map.tdi, value);
    }

    fn rst(&mut self, value: bool) {
        self.reserve(1);
        self.set(self.map.rst, value);
    }

    fn tst(&mut self, value: bool) {
        self.reserve(1);
        self.set(self.map.tst, value);
    }

    fn tdo(&mut self) -> bool {
        self.reserve(1);
        self.buffer.push(self.pins);
        let recv = self.commit();
        recv[recv.len() - 1] & (1 << self.map.tdo) != 0
    }

    fn tclk_get(&mut self) -> bool {
        self.tclk
    }

    fn delay_ms(&mut self, ms: u32) {
        self.commit();
        thread::sleep(Duration::from_millis(ms as u64));
    }

    fn flush_writes(&mut self) {
        self.commit();
    }

    fn ir_shift_read(&mut self, instruction: u8) -> u8 {
        self.reserve(64);
        self.enter_shift(true);
        self.shift(8, instruction as u16, true) as u8
    }

    fn dr_shift_8_read(&mut self, data: u8) -> u8 {
        self.reserve(64);
        self.enter_shift(false);
        self.shift(8, data as u16, true) as u8
    }

    fn dr_shift_16_read(&mut self, data: u16) -> u16 {
        self.reserve(96);
        self.enter_shift(false);
        self.shift(16, data, true)
    }

    fn ir_shift(&mut self, instruction: u8) {
        self.reserve(64);
        self.enter_shift(true);
        self.shift(8, instruction as u16, false);
    }

    fn dr_shift_8(&mut self, data: u8) {
        self.reserve(64);
        self.enter_shift(false);
        self.shift(8, data as u16, false);
    }

    fn dr_shift_16(&mut self, data: u16) {
        self.reserve(96);
        self.enter_shift(false);
        self.shift(16, data, false);
    }

    fn tms_sequence(&mut self, bits: u8, pattern: u16) {
        self.reserve(bits as usize * 4);
        for i in 0..bits {
            self.set(self.map.tck, false);
            self.set(self.map.tms, pattern & (1 << i) != 0);
            self.set(self.map.tck, true);
        }
    }
}

/// Transport through the FTDI vendor driver.
pub struct D2xx {
    ft: libftd2xx::Ftdi,
}

impl D2xx {
    /// Open an adapter by its device description and put it into
    /// synchronous bitbang mode.  `baud` paces the bitbang engine; the pin
    /// rate is 16 times the baud rate.
    pub fn open(description: &str, baud: u32, output_mask: u8) -> Self {
        use libftd2xx::{BitMode, FtdiCommon};

        let mut ft = libftd2xx::Ftdi::with_description(description).expect("new");
        ft.set_baud_rate(baud).expect("set_baud_rate");
        ft.set_bit_mode(output_mask, BitMode::SyncBitbang)
            .expect("set bit mode");
        ft.purge_all().expect("purge");

        Self { ft }
    }
}

impl FtdiTransport for D2xx {
    fn send(&mut self, buf: &[u8]) {
        use libftd2xx::FtdiCommon;
        self.ft.write(buf).expect("send");
    }

    fn recv(&mut self, buf: &mut [u8]) {
        use libftd2xx::FtdiCommon;
        self.ft.read(buf).expect("recv");
    }
}

/// Transport through libusb, for systems without the vendor driver.
pub struct Libusb {
    device: rusb::DeviceHandle<rusb::GlobalContext>,
    timeout: Duration,
}

impl Libusb {
    /// Open an adapter by VID/PID and put it into synchronous bitbang mode.
    pub fn open(vid: u16, pid: u16, baud: u32, output_mask: u8) -> Self {
        let mut device = rusb::open_device_with_vid_pid(vid, pid).expect("no FTDI device attached");
        let _ = device.detach_kernel_driver(0);
        device.claim_interface(0).expect("claim interface");

        let timeout = Duration::from_millis(500);
        device
            .write_control(FTDI_DEVICE_OUT_REQTYPE, SIO_RESET, 0, 0, &[], timeout)
            .expect("reset");

        // divisor against the 3 MHz base clock
        let divisor = (3_000_000 / baud).max(1);
        device
            .write_control(
                FTDI_DEVICE_OUT_REQTYPE,
                SIO_SET_BAUDRATE,
                (divisor & 0xFFFF) as u16,
                (divisor >> 16) as u16,
                &[],
                timeout,
            )
            .expect("set baudrate");

        device
            .write_control(
                FTDI_DEVICE_OUT_REQTYPE,
                SIO_SET_BITMODE,
                BITMODE_SYNCBB << 8 | output_mask as u16,
                0,
                &[],
                timeout,
            )
            .expect("set bit mode");

        Self { device, timeout }
    }
}

impl FtdiTransport for Libusb {
    fn send(&mut self, buf: &[u8]) {
        let mut sent = 0;
        while sent < buf.len() {
            sent += self
                .device
                .write_bulk(FTDI_OUT_EP, &buf[sent..], self.timeout)
                .expect("send");
        }
    }

    fn recv(&mut self, buf: &mut [u8]) {
        // every IN packet leads with two modem status bytes
        let mut packet = [0u8; 64];
        let mut received = 0;
        while received < buf.len() {
            let n = self
                .device
                .read_bulk(FTDI_IN_EP, &mut packet, self.timeout)
                .expect("recv");
            if n <= 2 {
                continue;
            }
            let data = &packet[2..n];
            let take = data.len().min(buf.len() - received);
            buf[received..received + take].copy_from_slice(&data[..take]);
            received += take;
        }
    }
}
