// Compile-time configuration for the ksched kernel

/// Capacity of the process table.
pub const NPROC: usize = 32;

/// Maximum number of function symbols kept for backtraces.
pub const MAX_SYMBOLS: usize = 64;

/// Bytes reserved for a symbol name, including the terminating NUL.
pub const SYMBOL_NAME_LEN: usize = 32;

/// First syscall number handled by the user syscall table.
pub const SYS_USER_BASE: u64 = 64;

/// Longest buffer the print syscall copies out of user memory at once.
pub const MAX_PRINT_LEN: usize = 256;

/// I/O port of QEMU's isa-debug-exit device.
pub const QEMU_EXIT_PORT: u16 = 0xf4;

/// COM1 base port.
pub const SERIAL_PORT: u16 = 0x3F8;
