//! Boot-time wiring: `init(region, size)` brings up the default heap and
//! the kernel-internal semaphores/threads; `start()` hands control to the
//! scheduler.
//!
//! Grounded in `rtos.c`'s `OS_Init`/`OS_Start`; the ordering (heap, then
//! sleep/lock semaphores, then idle thread(s), then tick registration,
//! then `ThreadSwapEnabled = 1; OS_ThreadReschedule(1)`) is carried over
//! unchanged. Logger bring-up ahead of everything else (`log::info!`
//! before the subsystem it describes exists) follows ordinary kernel
//! bring-up discipline.

use crate::sched::KernelState;

const IDLE_THREAD_STACK: usize = 256;
const IDLE_THREAD_PRIORITY: u8 = crate::config::PRIORITY_IDLE;

fn idle_thread_entry(_arg: usize) {
    loop {
        #[cfg(not(test))]
        x86_64::instructions::hlt();
        #[cfg(test)]
        core::hint::spin_loop();
    }
}

/// Bring the kernel up: install the logger, create the default heap over
/// `region`, create the reserved sleep/lock semaphores, spawn one idle
/// thread per CPU, and register the tick handler. Must be called exactly
/// once, before any other kernel operation.
pub fn init(region: &'static mut [u8]) {
    crate::diag::init();
    log::info!("initializing kernel over {} bytes", region.len());

    let mut state = KernelState::empty();

    crate::heap::create_locked(&mut state, 0, "Default", region)
        .expect("default heap region too small or misaligned");

    let sleep = crate::sync::semaphore::create_locked(&mut state, "Sleep", 0)
        .expect("reserved semaphore table exhausted during init");
    state.sleep_semaphore = Some(sleep);

    for cpu in 0..crate::config::NUM_CPUS {
        let id = crate::sched::create_locked(
            &mut state,
            "Idle",
            idle_thread_entry,
            0,
            IDLE_THREAD_PRIORITY,
            IDLE_THREAD_STACK,
        )
        .expect("could not create idle thread");
        if cpu == 0 {
            // The boot CPU starts out "running" the idle thread; every
            // other CPU picks its own up once `start` reschedules there.
            state.threads[id.index()].as_mut().unwrap().state = crate::thread::ThreadState::Running;
            state.current[cpu] = Some(id);
        }
    }

    crate::sched::install(state);

    crate::isr::register(1 << crate::config::TICK_IRQ, crate::isr::on_tick);
    crate::isr::mask_clear(1 << crate::config::TICK_IRQ);

    #[cfg(not(test))]
    crate::arch::x86::init_tick_source();

    log::info!("kernel initialized");
}

/// Enable preemption and yield into the highest-priority ready thread.
/// Never returns.
pub fn start() -> ! {
    log::info!("starting scheduler");
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| {
        state.swap_enabled = true;
        crate::sched::reschedule(state, true);
    });
    crate::critical::critical_end(cs);
    unreachable!("start() must never return to its caller")
}
