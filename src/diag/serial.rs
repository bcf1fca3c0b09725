//! Minimal COM1 serial writer.
//!
//! Trimmed to the single 16550 UART this crate's reference arch needs: no
//! second port, no interrupt-enable register twiddling.

use core::fmt;

use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1_BASE: u16 = 0x3F8;
const LINE_STATUS_OFFSET: u16 = 5;
const OUTPUT_EMPTY: u8 = 1 << 5;

struct Uart {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl Uart {
    const fn new(base: u16) -> Self {
        Uart {
            data: Port::new(base),
            line_status: Port::new(base + LINE_STATUS_OFFSET),
        }
    }

    fn write_byte(&mut self, byte: u8) {
        unsafe {
            while self.line_status.read() & OUTPUT_EMPTY == 0 {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
    }
}

static COM1: Mutex<Uart> = Mutex::new(Uart::new(COM1_BASE));

pub struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut uart = COM1.lock();
        for byte in s.bytes() {
            uart.write_byte(byte);
        }
        Ok(())
    }
}
