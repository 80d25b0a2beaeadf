// src/system/prober.rs
//
// Boots the release command inside a pseudo-terminal and walks the guest
// filesystem for write-access misconfigurations: Connecting (spawn + prompt
// handshake) -> Ready (identity query) -> Probing (permission walk) -> the
// child is force-killed no matter how the probe ends.

use crate::{
    constants::{COMMAND_TIMEOUT, CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, PROMPT_SENTINEL},
    core::{reporter::Reporter, runfile::Runfile},
    models::Identity,
};
use lazy_static::lazy_static;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use regex::Regex;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("the guest could not be spawned: {0}")]
    Spawn(String),
    #[error("time out")]
    Timeout,
    #[error("EOF")]
    Eof,
    #[error("writing to the guest failed: {0}")]
    Io(#[from] std::io::Error),
}

lazy_static! {
    static ref ANSI_ESCAPE_RE: Regex =
        Regex::new(r"\x1b(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap();
}

/// Request/response transport to a shell running inside the guest.
///
/// The permission walk only needs "run this command, give me its output", so
/// tests drive it with a scripted shell instead of a booted guest.
pub trait GuestShell {
    fn exec(&mut self, command: &str) -> Result<String, ProbeError>;
}

impl<T: GuestShell + ?Sized> GuestShell for &mut T {
    fn exec(&mut self, command: &str) -> Result<String, ProbeError> {
        (**self).exec(command)
    }
}

/// A guest shell bound to a pseudo-terminal. A dedicated reader thread drains
/// the terminal into a channel; every wait on the prompt sentinel is bounded.
pub struct PtyShell {
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    writer: Box<dyn Write + Send>,
    chunks: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    // The master side owns the terminal; dropping it early closes the channel.
    _master: Box<dyn MasterPty + Send>,
}

impl PtyShell {
    /// Spawns `tokens` directly (no intermediate shell) on a fresh PTY.
    pub fn spawn(tokens: &[String]) -> Result<Self, ProbeError> {
        let (program, args) = tokens
            .split_first()
            .ok_or_else(|| ProbeError::Spawn("empty command".to_string()))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(spawn_error)?;

        let mut builder = CommandBuilder::new(program);
        builder.args(args);
        let child = pair.slave.spawn_command(builder).map_err(spawn_error)?;
        let killer = child.clone_killer();

        let mut reader = pair.master.try_clone_reader().map_err(spawn_error)?;
        let writer = pair.master.take_writer().map_err(spawn_error)?;
        drop(pair.slave);

        let (chunk_tx, chunks) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if chunk_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            child,
            killer,
            writer,
            chunks,
            buffer: Vec::new(),
            _master: pair.master,
        })
    }

    /// Waits for the first prompt, then verifies the shell echoes data back.
    /// The marker is split across quotes so the typed command itself can never
    /// satisfy the wait.
    pub fn handshake(&mut self) -> Result<(), ProbeError> {
        self.expect(PROMPT_SENTINEL, CONNECT_TIMEOUT)?;
        self.send_line("echo 'kpwninit'washere")?;
        self.expect("kpwninitwashere", HANDSHAKE_TIMEOUT)?;
        self.skip_line(HANDSHAKE_TIMEOUT)?;
        Ok(())
    }

    /// Force-kills the guest. Idempotent; errors are irrelevant at this point.
    pub fn kill(&mut self) {
        let _ = self.killer.kill();
        let _ = self.child.wait();
    }

    fn send_line(&mut self, command: &str) -> Result<(), ProbeError> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consumes the stream up to and including `needle`, returning everything
    /// read before it. Bounded by `timeout`; expiry is not retried.
    fn expect(&mut self, needle: &str, timeout: Duration) -> Result<String, ProbeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = find_subslice(&self.buffer, needle.as_bytes()) {
                let consumed: Vec<u8> = self.buffer.drain(..pos + needle.len()).collect();
                let before = consumed.get(..pos).unwrap_or(&consumed);
                return Ok(String::from_utf8_lossy(before).into_owned());
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ProbeError::Timeout)?;
            match self.chunks.recv_timeout(remaining) {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Err(ProbeError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(ProbeError::Eof),
            }
        }
    }

    fn skip_line(&mut self, timeout: Duration) -> Result<(), ProbeError> {
        self.expect("\n", timeout).map(|_| ())
    }
}

impl GuestShell for PtyShell {
    fn exec(&mut self, command: &str) -> Result<String, ProbeError> {
        self.send_line(command)?;
        // Drop the echoed command line, keep everything up to the next prompt.
        self.skip_line(COMMAND_TIMEOUT)?;
        let output = self.expect(PROMPT_SENTINEL, COMMAND_TIMEOUT)?;
        Ok(ANSI_ESCAPE_RE.replace_all(&output, "").into_owned())
    }
}

fn spawn_error(e: anyhow::Error) -> ProbeError {
    ProbeError::Spawn(e.to_string())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Walks guest paths and reports components the probing identity can write to.
pub struct Prober<'a, S: GuestShell> {
    shell: S,
    identity: Identity,
    visited: HashSet<String>,
    found: Vec<String>,
    reporter: &'a Reporter,
}

impl<'a, S: GuestShell> Prober<'a, S> {
    /// Queries the guest identity and readies the walker.
    pub fn new(mut shell: S, reporter: &'a Reporter) -> Result<Self, ProbeError> {
        let output = shell.exec("id")?;
        let identity = match Identity::parse(output.trim()) {
            Some(identity) => identity,
            None => {
                reporter.debug(format!("Could not parse guest identity from: {output:?}"));
                Identity::default()
            }
        };
        reporter.debug(format!(
            "uid={}({}) gid={}({})",
            identity.uid,
            identity.uid_name.as_deref().unwrap_or("?"),
            identity.gid,
            identity.gid_name.as_deref().unwrap_or("?"),
        ));
        Ok(Self {
            shell,
            identity,
            visited: HashSet::new(),
            found: Vec::new(),
            reporter,
        })
    }

    /// Paths reported writable so far, in discovery order.
    pub fn writable_paths(&self) -> &[String] {
        &self.found
    }

    /// Classifies write access along `path`, ancestors before descendants.
    ///
    /// The traversal is an explicit stack of pending lookups plus a set of
    /// normalized paths already classified, so symlink cycles terminate and
    /// every path is probed at most once per walk. A missing path ends its
    /// branch silently; symlinks are re-targeted instead of being classified
    /// themselves. A timeout aborts the whole remaining walk.
    pub fn classify_writable(&mut self, path: &str, message: &str) -> Result<(), ProbeError> {
        let mut pending = vec![normalize(path)];
        while let Some(current) = pending.pop() {
            if self.visited.contains(&current) {
                continue;
            }
            if current != "/" {
                let parent = parent_dir(&current);
                if !self.visited.contains(&parent) {
                    pending.push(current);
                    pending.push(parent);
                    continue;
                }
            }
            self.visited.insert(current.clone());
            self.reporter.debug(format!("probing '{current}'"));

            let output = self.shell.exec(&format!("ls -ld '{current}'"))?;
            let output = output.trim();
            if output.contains("cannot access") || output.contains("No such file") {
                continue;
            }

            // `path -> target` means symlink; classify the target instead.
            let arrow = format!("{current} -> ");
            if let Some(idx) = output.find(&arrow) {
                let rest = &output[idx + arrow.len()..];
                let target = rest.lines().next().unwrap_or("").trim_end();
                if !target.is_empty() {
                    pending.push(resolve_link(&current, target));
                }
                continue;
            }

            let mut fields = output.split_whitespace();
            let (Some(perms), Some(_links), Some(owner), Some(group)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                self.reporter
                    .debug(format!("unparsable listing for '{current}': {output}"));
                continue;
            };
            let Some(bits) = perms.get(1..10) else {
                self.reporter
                    .debug(format!("short permission string for '{current}': {perms}"));
                continue;
            };
            if mode_grants_write(
                bits,
                self.identity.matches_user(owner),
                self.identity.matches_group(group),
            ) {
                self.reporter
                    .important(format!("Write-access to '{current}'. {message}"));
                self.found.push(current);
            }
        }
        Ok(())
    }
}

/// Write classification over a nine-character permission bit string
/// (`rwxrwxrwx` order): the owner triplet counts only for the owning user,
/// the group triplet only for the owning group, the last for everyone.
pub fn mode_grants_write(bits: &str, owner_match: bool, group_match: bool) -> bool {
    let b = bits.as_bytes();
    if b.len() < 9 {
        return false;
    }
    (owner_match && b[1] == b'w') || (group_match && b[4] == b'w') || b[7] == b'w'
}

/// Textual path normalization; guest paths must not touch the host filesystem.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if absolute {
        format!("/{}", parts.join("/"))
    } else if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// Resolves a symlink target relative to the link's parent directory.
fn resolve_link(link: &str, target: &str) -> String {
    if target.starts_with('/') {
        normalize(target)
    } else {
        normalize(&format!("{}/{}", parent_dir(link), target))
    }
}

/// Boots the release command and runs the permission walk over the paths a
/// guest can abuse to sidestep the intended vulnerability. Findings are
/// reported as they are discovered; a connection failure only skips probing.
pub fn run_unintended_checks(runfile: &Runfile, reporter: &Reporter) -> Result<(), ProbeError> {
    reporter.info("Running unintended checks...");

    let tokens = strip_shell_variables(runfile.release_tokens(), reporter);
    log::debug!("Booting guest: {}", tokens.join(" "));
    let shell = PtyShell::spawn(&tokens)?;
    // Whatever happens below, the guest must not outlive the probe.
    let mut shell = scopeguard::guard(shell, |mut s| s.kill());
    shell.handshake()?;

    let mut prober = Prober::new(&mut *shell, reporter)?;
    prober.classify_writable(
        "/sbin/modprobe",
        "Unintended solution: hijack /sbin/modprobe",
    )?;
    prober.classify_writable(
        "/etc/passwd",
        "Unintended solution: overwrite /etc/passwd (if busybox is SUID)",
    )?;

    reporter.info("Finished unintended checks");
    Ok(())
}

/// Without a shell in front of the guest command, `$VARIABLES` never expand.
/// Drop each offending value together with the flag introducing it so the
/// remaining command still has a chance to boot.
fn strip_shell_variables(tokens: Vec<String>, reporter: &Reporter) -> Vec<String> {
    if !tokens.iter().any(|t| t.contains('$')) {
        return tokens;
    }
    reporter.error(
        "Shell variable detected in the launch script. The reconstructed command might not work",
    );
    let mut keep = vec![true; tokens.len()];
    for i in 1..tokens.len() {
        if tokens[i].contains('$') {
            keep[i] = false;
            keep[i - 1] = false;
        }
    }
    tokens
        .into_iter()
        .zip(keep)
        .filter_map(|(token, kept)| kept.then_some(token))
        .collect()
}
