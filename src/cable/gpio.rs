//! Implement the `Cable` trait for directly wired GPIO pins.  All shifting
//! goes through the default bit-bang sequences; this backend only moves the
//! lines.
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin, PinState},
};

use crate::cable::Cable;

pub struct Gpio<Tck, Tms, Tdi, Tdo, Rst, Tst, Delay>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Rst: OutputPin,
    Tst: OutputPin,
    Delay: DelayNs,
{
    half_period: u32,
    delay: Delay,
    tck: Tck,
    tms: Tms,
    tdi: Tdi,
    tdo: Tdo,
    rst: Rst,
    tst: Tst,
    tclk: bool,
}

impl<Tck, Tms, Tdi, Tdo, Rst, Tst, Delay> Gpio<Tck, Tms, Tdi, Tdo, Rst, Tst, Delay>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Rst: OutputPin,
    Tst: OutputPin,
    Delay: DelayNs,
{
    pub fn new(
        freq_khz: u32,
        tck: Tck,
        tms: Tms,
        tdi: Tdi,
        tdo: Tdo,
        rst: Rst,
        tst: Tst,
        delay: Delay,
    ) -> Self {
        let period_ns = 1_000_000 / freq_khz;
        let half_period = period_ns / 2;
        Gpio {
            half_period,
            delay,
            tck,
            tms,
            tdi,
            tdo,
            rst,
            tst,
            tclk: false,
        }
    }
}

impl<Tck, Tms, Tdi, Tdo, Rst, Tst, Delay> Cable for Gpio<Tck, Tms, Tdi, Tdo, Rst, Tst, Delay>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Rst: OutputPin,
    Tst: OutputPin,
    Delay: DelayNs,
{
    fn tms(&mut self, value: bool) {
        self.tms.set_state(PinState::from(value)).unwrap();
    }

    fn tck(&mut self, value: bool) {
        self.tck.set_state(PinState::from(value)).unwrap();
        self.delay.delay_ns(self.half_period);
    }

    fn tdi(&mut self, value: bool) {
        self.tdi.set_state(PinState::from(value)).unwrap();
    }

    fn tclk(&mut self, value: bool) {
        // Four-wire JTAG: the target clock is the TDI pin while the TAP is
        // in Run-Test/Idle
        self.tclk = value;
        self.tdi.set_state(PinState::from(value)).unwrap();
        self.delay.delay_ns(self.half_period);
    }

    fn rst(&mut self, value: bool) {
        self.rst.set_state(PinState::from(value)).unwrap();
    }

    fn tst(&mut self, value: bool) {
        self.tst.set_state(PinState::from(value)).unwrap();
    }

    fn tdo(&mut self) -> bool {
        self.tdo.is_high().unwrap()
    }

    fn tclk_get(&mut self) -> bool {
        self.tclk
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
