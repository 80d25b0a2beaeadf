// src/system/vmlinux.rs

use crate::{
    CancellationToken,
    constants::{VMLINUX_BACKUP_FILE, VMLINUX_FILE},
    core::reporter::Reporter,
    system::executor::{self, ExecutionError},
};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

const SUCCESS_MARKER: &[u8] = b"Successfully wrote the new ELF kernel";

/// Extracts an uncompressed, symbolized kernel from the compressed image.
///
/// vmlinux-to-elf takes a while on real kernels, so the work runs on its own
/// thread. The caller owns the handle and joins it before the process exits;
/// the token cancels an extraction that has not started its helper yet.
pub fn spawn_extraction(
    kernel: PathBuf,
    reporter: Reporter,
    token: CancellationToken,
) -> JoinHandle<()> {
    thread::spawn(move || extract(&kernel, &reporter, &token))
}

fn extract(kernel: &Path, reporter: &Reporter, token: &CancellationToken) {
    if Path::new(VMLINUX_FILE).exists() {
        if let Err(e) = fs::rename(VMLINUX_FILE, VMLINUX_BACKUP_FILE) {
            reporter.error(format!("Could not move the existing vmlinux aside: {e}"));
            return;
        }
    }

    reporter.info("Extracting vmlinux...");
    let kernel_arg = kernel.display().to_string();
    match executor::run_and_capture("vmlinux-to-elf", &["--", &kernel_arg, VMLINUX_FILE], token) {
        Ok(output) => {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            if contains_marker(&combined) {
                reporter.info("Successfully extracted vmlinux");
                return;
            }
            reporter.error("Failed extracting vmlinux using vmlinux-to-elf");
            if !combined.is_empty() {
                reporter.debug(format!(
                    "vmlinux-to-elf output:\n{}",
                    String::from_utf8_lossy(&combined)
                ));
            }
        }
        Err(ExecutionError::Cancelled) => return,
        Err(ExecutionError::CommandFailed(_, e)) if e.kind() == ErrorKind::NotFound => {
            reporter.error("Missing vmlinux-to-elf in PATH");
        }
        Err(e) => reporter.error(format!("Failed running vmlinux-to-elf: {e}")),
    }

    fallback(&kernel_arg, reporter, token);
}

/// The dumber extraction: decompress without symbols. Better than nothing for
/// a gdb session.
fn fallback(kernel_arg: &str, reporter: &Reporter, token: &CancellationToken) {
    if !executor::is_executable_in_path("extract-vmlinux") {
        reporter.error("Missing extract-vmlinux in PATH. Cannot extract vmlinux");
        return;
    }
    match executor::run_and_capture("extract-vmlinux", &[kernel_arg], token) {
        Ok(output) if output.status.success() && !output.stdout.is_empty() => {
            match fs::write(VMLINUX_FILE, &output.stdout) {
                Ok(()) => reporter.info("Successfully extracted vmlinux using extract-vmlinux"),
                Err(e) => reporter.error(format!("Could not write vmlinux: {e}")),
            }
        }
        Ok(_) => reporter.error("Failed extracting vmlinux using extract-vmlinux"),
        Err(ExecutionError::Cancelled) => {}
        Err(e) => reporter.error(format!("Failed running extract-vmlinux: {e}")),
    }
}

fn contains_marker(output: &[u8]) -> bool {
    output
        .windows(SUCCESS_MARKER.len())
        .any(|window| window == SUCCESS_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_marker() {
        assert!(contains_marker(
            b"[+] Successfully wrote the new ELF kernel to vmlinux"
        ));
        assert!(!contains_marker(b"Traceback (most recent call last):"));
        assert!(!contains_marker(b""));
    }
}
