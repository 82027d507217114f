#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod process;
pub mod symbols;
pub mod syscalls;

#[cfg(feature = "kernel")]
pub mod serial;
#[cfg(feature = "kernel")]
pub mod logger;
#[cfg(feature = "kernel")]
pub mod qemu;

/// Halt the CPU until the next interrupt, forever.
#[cfg(feature = "kernel")]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
