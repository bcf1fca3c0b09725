//! IRQ-safe logging: lock-free, allocation-free direct serial writes,
//! safe to call from inside [`crate::isr::interrupt_service`] where the
//! normal buffered/locked `log::Log` backend is not.

use x86_64::instructions::port::Port;

const DATA_PORT: u16 = 0x3F8;
const LINE_STATUS_PORT: u16 = 0x3FD;
const OUTPUT_EMPTY: u8 = 1 << 5;

fn irq_log_str(msg: &str) {
    let mut data: Port<u8> = Port::new(DATA_PORT);
    let mut status: Port<u8> = Port::new(LINE_STATUS_PORT);
    for byte in msg.bytes() {
        unsafe {
            while status.read() & OUTPUT_EMPTY == 0 {
                core::hint::spin_loop();
            }
            data.write(byte);
        }
    }
}

fn irq_log_newline() {
    irq_log_str("\r\n");
}

/// Log a `[IRQ] prefix: msg` line directly to the serial port, bypassing
/// the buffered/locked `log::Log` backend (and its `spin::Mutex`)
/// entirely.
pub fn irq_log(prefix: &str, msg: &str) {
    irq_log_str("[IRQ] ");
    irq_log_str(prefix);
    irq_log_str(": ");
    irq_log_str(msg);
    irq_log_newline();
}
