// Machine primitives backed by QEMU
use x86_64::instructions::port::Port;
use crate::config::QEMU_EXIT_PORT;
use crate::process::{FatalError, Machine, Pid, TrapFrame};
use crate::{hlt_loop, serial_println};

/// Values written to isa-debug-exit. QEMU exits with `(value << 1) | 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) {
    unsafe {
        let mut port = Port::new(QEMU_EXIT_PORT);
        port.write(exit_code as u32);
    }
}

/// Kernel-mode processes: a trap frame's `pc` is the address of an
/// `extern "C" fn() -> !` entry point.
pub struct QemuMachine;

impl Machine for QemuMachine {
    fn switch_to(&mut self, pid: Pid, frame: &TrapFrame) -> ! {
        if frame.pc == 0 {
            serial_println!("[fatal] process {} has no entry point", pid);
            exit_qemu(QemuExitCode::Failed);
            hlt_loop();
        }
        // Safety: pc values are only ever taken from `extern "C" fn() -> !` items.
        let entry: extern "C" fn() -> ! = unsafe { core::mem::transmute(frame.pc as usize) };
        entry()
    }

    fn shutdown(&mut self, code: i32) -> ! {
        serial_println!("system shutdown with code {}", code);
        if code == 0 {
            exit_qemu(QemuExitCode::Success);
        } else {
            exit_qemu(QemuExitCode::Failed);
        }
        hlt_loop()
    }

    fn fatal(&mut self, error: &FatalError) -> ! {
        serial_println!("[fatal] {}", error);
        exit_qemu(QemuExitCode::Failed);
        hlt_loop()
    }
}
