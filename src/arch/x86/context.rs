//! Saved register context and the cooperative stack switch.
//!
//! This is the one piece of the kernel that cannot be expressed portably:
//! its semantics (two returns from one call site) are the hard part. The
//! original Plasma RTOS gets those two returns from `setjmp`/`longjmp`.
//! This port gets the same *effect* — suspend the calling thread's stack,
//! resume a different one,
//! and eventually have the call "return" a second time once something
//! switches back — from the classic stackful-coroutine call/ret trick
//! instead:
//!
//! `switch_to` pushes the outgoing thread's callee-saved registers onto its
//! own stack, stashes the resulting `rsp` in `Context`, loads `rsp` from the
//! incoming thread's saved `Context`, pops *its* callee-saved registers, and
//! `ret`s. Because the incoming thread's stack has a return address sitting
//! where `ret` expects one (either a previous `switch_to` call site, or the
//! fabricated frame `prepare` builds for a brand-new thread), execution
//! resumes exactly where that thread left off — which, from the caller's
//! point of view, looks like `switch_to` returning late, from inside
//! somebody else's call stack. Only `rsp` and the callee-saved registers
//! travel through the switch; caller-saved registers are never live across
//! a call in the first place, so the System V AMD64 calling convention
//! already guarantees nothing else needs preserving.
//!
//! A brand-new thread has never called `switch_to`, so there is no real
//! suspended stack to resume. [`Context::prepare`] fabricates one: a fake
//! call frame whose "return address" is [`trampoline`] and whose
//! callee-saved slots are zeroed. The first `switch_to` into such a thread
//! pops the zeros and `ret`s straight into the trampoline, which looks up
//! its own identity, enables interrupts, and calls the user entry point.

use core::arch::{asm, naked_asm};

/// Opaque saved-register context. Large enough to hold the stack pointer
/// alone — the callee-saved general-purpose registers live *on* the stack
/// the pointer refers to, not in this struct, which is what keeps the
/// switch itself to a handful of instructions.
#[repr(C)]
pub struct Context {
    rsp: u64,
}

impl Context {
    pub const fn new() -> Self {
        Context { rsp: 0 }
    }

    /// Lay out a fresh thread's stack so that the first `switch_to` into
    /// it resumes at [`trampoline`]. `stack_top` must point one-past-the-end
    /// of a stack region at least `128` bytes long that nothing else is
    /// using.
    ///
    /// # Safety
    /// `stack_top` must be 16-byte aligned and the region below it for at
    /// least `128` bytes must be valid, writable, and not otherwise in use.
    pub unsafe fn prepare(&mut self, stack_top: *mut u8) {
        unsafe {
            // System V: callee-saved regs restored by switch_to's epilogue,
            // in the order it pops them (reverse push order).
            let mut sp = stack_top as usize;
            sp &= !0xF; // 16-byte align

            // Return address `ret` will jump to.
            sp -= 8;
            *(sp as *mut u64) = trampoline as usize as u64;

            // Six zeroed callee-saved slots: rbx, rbp, r12, r13, r14, r15.
            for _ in 0..6 {
                sp -= 8;
                *(sp as *mut u64) = 0;
            }

            self.rsp = sp as u64;
        }
    }

    /// Save the currently-running thread's machine state into `self`,
    /// switch the stack to `next`, and resume execution there. Returns
    /// once some later `switch_to` targets `self` again.
    ///
    /// # Safety
    /// Both `self` and `next` must be contexts previously initialized by
    /// `prepare` or by a prior `switch_to`, and must not be switched into
    /// concurrently from more than one CPU.
    #[inline(always)]
    pub unsafe fn switch_to(&mut self, next: &Context) {
        unsafe {
            raw_switch(&mut self.rsp, &next.rsp);
        }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn raw_switch(save_rsp: *mut u64, load_rsp: *const u64) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Landing pad for a thread's first-ever resume. Looks up which thread it
/// is (there is no other way to pass an argument through the fabricated
/// call frame `prepare` built), enables interrupts — the trampoline always
/// starts with interrupts disabled, having been reached via a `switch_to`
/// called from inside a critical section — and calls the user entry point.
/// If the entry point returns instead of calling `thread_exit` itself, the
/// trampoline exits on its behalf.
extern "C" fn trampoline() -> ! {
    unsafe {
        asm!("sti");
    }
    crate::sched::run_current_thread_entry()
}
