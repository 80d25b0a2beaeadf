// src/cli.rs

use clap::Parser;

/// A tool for automating setup of kernel pwn challenges.
///
/// Run it from a challenge directory containing the launch script, kernel
/// image and initramfs archive; everything can also be pointed at explicitly.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Only run checks. Do not create files
    #[arg(long)]
    pub no_files: bool,

    /// Do not extract vmlinux
    #[arg(long)]
    pub no_vmlinux: bool,

    /// Clean up previously generated files and exit
    #[arg(long)]
    pub clean: bool,

    /// Specify the kernel image
    #[arg(long = "bzImage", value_name = "FILE")]
    pub bz_image: Option<String>,

    /// Specify the initramfs archive
    #[arg(long, value_name = "FILE")]
    pub cpio: Option<String>,

    /// Specify the launch script
    #[arg(long, value_name = "FILE")]
    pub runfile: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let cli = Cli::parse_from([
            "kpwninit",
            "-v",
            "--no-vmlinux",
            "--bzImage",
            "kernel/bzImage",
            "--cpio",
            "rootfs.cpio.gz",
        ]);
        assert!(cli.verbose);
        assert!(cli.no_vmlinux);
        assert!(!cli.clean);
        assert_eq!(cli.bz_image.as_deref(), Some("kernel/bzImage"));
        assert_eq!(cli.cpio.as_deref(), Some("rootfs.cpio.gz"));
        assert!(cli.runfile.is_none());
    }

    #[test]
    fn test_defaults_are_off() {
        let cli = Cli::parse_from(["kpwninit"]);
        assert!(!cli.verbose && !cli.no_files && !cli.no_vmlinux && !cli.clean);
    }
}
