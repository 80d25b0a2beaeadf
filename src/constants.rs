// src/constants.rs

use std::time::Duration;

/// Program-name prefix that marks the emulator invocation inside a launch script.
pub const QEMU_PROGRAM_PREFIX: &str = "qemu-system";

/// Fixed prompt string the guest shell prints when it is ready for input.
pub const PROMPT_SENTINEL: &str = "$ ";

/// Marker written into every generated file so cleanup never touches user files.
pub const GENERATED_SIGNATURE: &str = "Generated by kpwninit";

/// The name of the generated debug launch script.
pub const DEBUG_RUNFILE: &str = "my-run.sh";

/// The name of the generated GDB bootstrap config.
pub const DEBUG_GDB_FILE: &str = "debug.gdb";

/// The name of the generated build/repack Makefile.
pub const MAKEFILE_FILE: &str = "Makefile";

/// The name of the initramfs repack helper script.
pub const MAKEROOT_FILE: &str = "makeroot";

/// The name of the exploit source skeleton directory.
pub const EXPLOIT_SRC_DIR: &str = "exploit-src";

/// Output file for the extracted, symbolized kernel.
pub const VMLINUX_FILE: &str = "vmlinux";

/// Where a pre-existing vmlinux is moved before a new extraction.
pub const VMLINUX_BACKUP_FILE: &str = "vmlinux - backup";

/// Load address the guest kernel assigns to the first out-of-tree module.
pub const MODULE_LOAD_ADDRESS: &str = "0xffffffffc0000000";

/// How long to wait for the first prompt after booting the guest.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the handshake echo once a prompt was seen.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-command timeout during probing. No retries on expiry.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
