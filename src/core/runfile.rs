// src/core/runfile.rs

use crate::{
    constants::QEMU_PROGRAM_PREFIX,
    core::{
        paths,
        reporter::Reporter,
        tokenizer::{self, TokenizeError},
    },
    models::{Finding, FlagArity, FlagValue, ParsedFlag, lookup_flag},
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunfileError {
    #[error("Launch script {0:?} does not exist.")]
    RunfileMissing(PathBuf),
    #[error("No launch script found in the current directory.")]
    RunfileNotFound,
    #[error("No '{QEMU_PROGRAM_PREFIX}' invocation found in {0:?}.")]
    InvocationNotFound(PathBuf),
    #[error("Launch script could not be parsed: {0}")]
    Syntax(#[from] TokenizeError),
    #[error("No kernel image (bzImage) found.")]
    MissingKernel,
    #[error("No initial ramdisk (cpio) found.")]
    MissingInitrd,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The reconstructed emulator invocation of a challenge launch script.
///
/// Flags are kept in first-occurrence order so a render with no overrides
/// reproduces the parsed command. Apart from the kernel and initrd values,
/// which are fixed up once during construction, the model is immutable;
/// derived variants are fresh token sequences.
#[derive(Debug, Clone)]
pub struct Runfile {
    pub path: PathBuf,
    pub program: String,
    /// Guest architecture, taken from the program-name suffix.
    pub arch: String,
    flags: Vec<ParsedFlag>,
    /// Tokens the flag table does not know. Diagnostics only, never re-emitted.
    ignored: Vec<String>,
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub initrd_gzipped: bool,
}

impl Runfile {
    /// Locates the launch script, parses its emulator invocation and resolves
    /// the kernel image and initial ramdisk to existing files.
    pub fn discover(
        script: Option<PathBuf>,
        cpio: Option<PathBuf>,
        kernel: Option<PathBuf>,
        reporter: &Reporter,
    ) -> Result<Self, RunfileError> {
        let path = match script {
            Some(p) if p.is_file() => p,
            Some(p) => return Err(RunfileError::RunfileMissing(p)),
            None => paths::find_runfile(Path::new(".")).ok_or(RunfileError::RunfileNotFound)?,
        };
        let text = fs::read_to_string(&path)?;
        let mut runfile = Self::from_script(&path, &text, reporter)?;
        runfile.resolve_resources(Path::new("."), cpio, kernel)?;
        Ok(runfile)
    }

    /// Parses the emulator invocation out of the script text. The invocation
    /// is detected by the fixed program-name prefix; only its first logical
    /// line is consumed.
    pub fn from_script(
        path: &Path,
        text: &str,
        reporter: &Reporter,
    ) -> Result<Self, RunfileError> {
        let start = text
            .find(QEMU_PROGRAM_PREFIX)
            .ok_or_else(|| RunfileError::InvocationNotFound(path.to_path_buf()))?;
        let mut tokens = tokenizer::tokenize(&text[start..])?.into_iter();
        let program = tokens
            .next()
            .ok_or_else(|| RunfileError::InvocationNotFound(path.to_path_buf()))?;
        let arch = program
            .strip_prefix(QEMU_PROGRAM_PREFIX)
            .map(|rest| rest.trim_start_matches('-'))
            .unwrap_or_default()
            .to_string();

        let mut flags: Vec<ParsedFlag> = Vec::new();
        let mut ignored: Vec<String> = Vec::new();
        let mut tokens = tokens.peekable();
        while let Some(token) = tokens.next() {
            if !token.starts_with('-') {
                // Stray value without a flag. argparse would call it positional.
                ignored.push(token);
                continue;
            }
            let name = token.trim_start_matches('-');
            let Some(def) = lookup_flag(name) else {
                ignored.push(token);
                if let Some(value) = next_value(&mut tokens) {
                    ignored.push(value);
                }
                continue;
            };
            match def.arity {
                FlagArity::Boolean => upsert(&mut flags, def.name, FlagValue::Present),
                FlagArity::Single => match next_value(&mut tokens) {
                    Some(value) => upsert(&mut flags, def.name, FlagValue::Single(value)),
                    None => upsert(&mut flags, def.name, FlagValue::Present),
                },
                FlagArity::Repeatable => match next_value(&mut tokens) {
                    Some(value) => append_value(&mut flags, def.name, value),
                    None => upsert(&mut flags, def.name, FlagValue::Present),
                },
            }
        }
        if !ignored.is_empty() {
            reporter.debug(format!(
                "The following launch-script arguments were ignored: {}",
                ignored.join(" ")
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            program,
            arch,
            flags,
            ignored,
            kernel: PathBuf::new(),
            initrd: PathBuf::new(),
            initrd_gzipped: false,
        })
    }

    /// Resolves the kernel image and the initial ramdisk to existing files,
    /// searching `dir` with fixed filename patterns when the parsed flags do
    /// not point at one. Failure of either resolution is fatal.
    pub fn resolve_resources(
        &mut self,
        dir: &Path,
        cpio: Option<PathBuf>,
        kernel: Option<PathBuf>,
    ) -> Result<(), RunfileError> {
        let candidate = cpio.or_else(|| self.get("initrd").map(PathBuf::from));
        let initrd = match candidate {
            Some(p) if dir.join(&p).is_file() => p,
            _ => paths::find_cpio(dir).ok_or(RunfileError::MissingInitrd)?,
        };
        self.initrd_gzipped = initrd.to_string_lossy().ends_with(".gz");
        upsert(
            &mut self.flags,
            "initrd",
            FlagValue::Single(initrd.display().to_string()),
        );
        self.initrd = initrd;

        let candidate = kernel.or_else(|| self.get("kernel").map(PathBuf::from));
        let kernel = match candidate {
            Some(p) if dir.join(&p).is_file() => p,
            _ => paths::find_kernel(dir).ok_or(RunfileError::MissingKernel)?,
        };
        upsert(
            &mut self.flags,
            "kernel",
            FlagValue::Single(kernel.display().to_string()),
        );
        self.kernel = kernel;
        log::debug!(
            "Resolved kernel to {:?}, initrd to {:?}",
            self.kernel,
            self.initrd
        );
        Ok(())
    }

    /// Value of a single-arity flag, if present with a value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.flags.iter().find(|f| f.name == name).and_then(|f| {
            match &f.value {
                FlagValue::Single(v) => Some(v.as_str()),
                _ => None,
            }
        })
    }

    /// Whether a flag occurred at all.
    pub fn is_set(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f.name == name)
    }

    /// Tokens that were not recognized while parsing.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Re-emits the recognized flags in first-occurrence order, substituting
    /// any override value by flag name.
    fn render(&self, overrides: &[(&str, String)]) -> Vec<String> {
        let mut tokens = vec![self.program.clone()];
        for flag in &self.flags {
            let dashed = format!("-{}", flag.name);
            let replacement = overrides
                .iter()
                .find(|(name, _)| *name == flag.name)
                .map(|(_, value)| value);
            match &flag.value {
                FlagValue::Present => tokens.push(dashed),
                FlagValue::Single(value) => {
                    tokens.push(dashed);
                    tokens.push(replacement.unwrap_or(value).clone());
                }
                FlagValue::List(values) => {
                    for value in values {
                        tokens.push(dashed.clone());
                        tokens.push(value.clone());
                    }
                }
            }
        }
        tokens
    }

    /// The parsed command with the initrd pointing at the resolved on-disk
    /// archive. This is what gets booted for the unintended checks.
    pub fn release_tokens(&self) -> Vec<String> {
        self.render(&[("initrd", self.initrd.display().to_string())])
    }

    /// The release command made debugger-friendly: full kernel log verbosity,
    /// no reboot-on-panic, no KASLR, and the gdb stub listening.
    pub fn debug_tokens(&self) -> Vec<String> {
        let mut kernel_args: Vec<String> = self
            .get("append")
            .map(|append| append.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        set_cmdline_arg(&mut kernel_args, "loglevel", "loglevel=7");
        set_cmdline_arg(&mut kernel_args, "panic", "panic=0");
        set_cmdline_arg(&mut kernel_args, "kaslr", "nokaslr");
        let append = kernel_args.join(" ");

        let mut tokens = self.render(&[
            ("initrd", self.initrd.display().to_string()),
            ("append", append.clone()),
        ]);
        if !self.is_set("append") {
            tokens.push("-append".to_string());
            tokens.push(append);
        }
        tokens.push("-s".to_string());
        tokens
    }

    /// Inspects the launch flags for exploitation-relevant properties.
    pub fn analyze(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        let cpu_args: Vec<&str> = self
            .get("cpu")
            .map(|cpu| cpu.split(',').collect())
            .unwrap_or_default();
        let vm_args: Vec<String> = self
            .get("append")
            .map(|append| append.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        if !self.is_set("monitor") || self.get("serial") == Some("mon:stdio") {
            findings.push(Finding::important(
                "QEMU monitor reachable from the guest console. Unintended escape",
            ));
        }

        if cpu_args.iter().any(|a| *a == "smep" || *a == "+smep") {
            findings.push(Finding::info("SMEP present"));
        } else {
            findings.push(Finding::info("No SMEP"));
        }
        if cpu_args.iter().any(|a| *a == "smap" || *a == "+smap") {
            findings.push(Finding::info("SMAP present"));
        } else {
            findings.push(Finding::info("No SMAP"));
        }

        if let Some(smp) = self.get("smp") {
            let cpu_count = if smp.chars().all(|c| c.is_ascii_digit()) {
                smp.parse().unwrap_or(1)
            } else {
                let parts: Vec<String> = smp.split(',').map(str::to_string).collect();
                get_cmdline_arg(&parts, "cores")
                    .filter(|v| !v.is_empty())
                    .unwrap_or("1")
                    .parse()
                    .unwrap_or(1)
            };
            if cpu_count > 1 {
                findings.push(Finding::info("Multiple CPUs. Maybe race condition?"));
            }
        }

        if get_cmdline_arg(&vm_args, "nokaslr").is_some() {
            findings.push(Finding::info("No KASLR"));
        }

        let pti_x86 = get_cmdline_arg(&vm_args, "pti") == Some("on") && self.arch == "x86_64";
        let pti_arm = get_cmdline_arg(&vm_args, "kpti") == Some("1") && self.arch == "aarch64";
        if pti_x86 || pti_arm {
            findings.push(Finding::info("Page Table Isolation (pti) enabled"));
        }

        if get_cmdline_arg(&vm_args, "oops") != Some("panic") {
            findings.push(Finding::info("Kernel panics will not crash the emulator"));
        }

        findings
    }
}

/// Consumes the next token as a flag value unless it is absent or itself a flag.
fn next_value<I: Iterator<Item = String>>(tokens: &mut std::iter::Peekable<I>) -> Option<String> {
    match tokens.peek() {
        Some(next) if !next.starts_with('-') => tokens.next(),
        _ => None,
    }
}

/// Sets a flag value, overwriting a prior occurrence (last one wins) while
/// keeping the flag's original position in the sequence.
fn upsert(flags: &mut Vec<ParsedFlag>, name: &'static str, value: FlagValue) {
    match flags.iter_mut().find(|f| f.name == name) {
        Some(existing) => existing.value = value,
        None => flags.push(ParsedFlag { name, value }),
    }
}

/// Appends one value to a repeatable flag, preserving encounter order.
fn append_value(flags: &mut Vec<ParsedFlag>, name: &'static str, value: String) {
    match flags.iter_mut().find(|f| f.name == name) {
        Some(ParsedFlag {
            value: FlagValue::List(values),
            ..
        }) => values.push(value),
        Some(existing) => existing.value = FlagValue::List(vec![value]),
        None => flags.push(ParsedFlag {
            name,
            value: FlagValue::List(vec![value]),
        }),
    }
}

/// Returns the value of `key` in a kernel command-line argument list.
/// A bare `key` (no `=`) yields an empty value.
pub fn get_cmdline_arg<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    for arg in args {
        let (k, v) = match arg.split_once('=') {
            Some((k, v)) => (k, v),
            None => (arg.as_str(), ""),
        };
        if k == key {
            return Some(v);
        }
    }
    None
}

/// Replaces the argument whose key matches `key` with `replacement`, or
/// appends `replacement` when no argument carries that key.
pub fn set_cmdline_arg(args: &mut Vec<String>, key: &str, replacement: &str) {
    for arg in args.iter_mut() {
        let matches = arg.split_once('=').map_or(arg.as_str(), |(k, _)| k) == key;
        if matches {
            *arg = replacement.to_string();
            return;
        }
    }
    args.push(replacement.to_string());
}
