//! Reference tick source: the legacy 8253/8254 Programmable Interval Timer
//! wired to fire IRQ0 at `HZ` Hz. Not part of the kernel core — a real
//! embedded target replaces this with whichever timer peripheral it has
//! and calls [`crate::isr::on_tick`] from its own handler.

use x86_64::instructions::port::Port;

/// Scheduler quantum, in Hz.
const HZ: u32 = 100;
const PIT_FREQUENCY: u32 = 1_193_182;

/// Program the PIT for periodic mode at [`HZ`] and unmask IRQ0 on the
/// legacy PIC. Must run once, after [`crate::isr`]'s table and the PIC
/// remapping a real boot sequence performs are both in place.
pub fn init() {
    let divisor = (PIT_FREQUENCY / HZ) as u16;

    unsafe {
        let mut command: Port<u8> = Port::new(0x43);
        let mut channel0: Port<u8> = Port::new(0x40);
        command.write(0x36u8); // channel 0, lobyte/hibyte, rate generator
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }

    log::info!("PIT tick source programmed for {HZ} Hz");
}
