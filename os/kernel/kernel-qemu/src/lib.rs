//! # QEMU Debug Console Support
//!
//! Logging for a kernel running under `qemu-system-i386`. Output goes to the
//! QEMU debug console (I/O port `0x402`), which the host captures with
//! `-debugcon stdio` or `-debugcon file:debug.log`.
//!
//! ## Components
//!
//! * [`QemuLogger`]: a `log::Log` implementation. Every record is written as
//!   `[LEVEL] target: message`. The memory-management core logs its fatal
//!   paths at `error` level and its degrade-gracefully paths at `warn`.
//! * [`qemu_trace!`]: direct `format!`-style output that bypasses the `log`
//!   facade; used from fault handlers where the logger may not be set up.
//!
//! ## Feature System
//!
//! With the default `enabled` feature, bytes are written to the port. Without
//! it, all output compiles to nothing. Port writes are only emitted on bare
//! metal (`target_os = "none"`); hosted test builds discard the bytes.
//!
//! ```rust,no_run
//! use log::LevelFilter;
//!
//! kernel_qemu::QemuLogger::init(LevelFilter::Debug).expect("logger initialization");
//! log::info!("paging enabled");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug console.
    #[cfg(target_os = "none")]
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(target_os = "none")]
        unsafe {
            outb(QEMU_DEBUG_PORT, c);
        }
        #[cfg(not(target_os = "none"))]
        let _ = c;
    }

    #[cfg(target_os = "none")]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub const fn qemu_write(_: fmt::Arguments) {}
}

#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
