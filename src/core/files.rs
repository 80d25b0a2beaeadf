// src/core/files.rs

use crate::{
    CancellationToken,
    constants::{
        DEBUG_GDB_FILE, DEBUG_RUNFILE, EXPLOIT_SRC_DIR, GENERATED_SIGNATURE, MAKEFILE_FILE,
        MAKEROOT_FILE, MODULE_LOAD_ADDRESS,
    },
    core::{cpio, reporter::Reporter, runfile::Runfile, tokenizer},
    system::{executor, vmlinux},
};
use anyhow::Result;
use dialoguer::{Confirm, theme::ColorfulTheme};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::thread::JoinHandle;

const MAKEFILE_TEMPLATE: &str = include_str!("../../templates/Makefile");
const MAKEROOT_TEMPLATE: &str = include_str!("../../templates/makeroot");
const EXPLOIT_TEMPLATES: &[(&str, &str)] = &[
    ("exploit.c", include_str!("../../templates/exploit-src/exploit.c")),
    ("Makefile", include_str!("../../templates/exploit-src/Makefile")),
];

/// Creates the working files for the challenge: debug launch script, GDB
/// bootstrap, Makefile, exploit skeleton and repack helper. Also kicks off
/// the vmlinux extraction; the returned handle joins that background task.
pub fn create_files(
    runfile: &Runfile,
    no_files: bool,
    no_vmlinux: bool,
    reporter: &Reporter,
    token: &CancellationToken,
) -> Result<Option<JoinHandle<()>>> {
    if no_files {
        return Ok(None);
    }

    fs::write(DEBUG_RUNFILE, render_debug_script(runfile))?;
    make_executable(DEBUG_RUNFILE)?;

    if runfile.initrd_gzipped {
        decompress_initrd(&runfile.initrd)?;
    }

    let module = match cpio::extract_challenge_module(
        &runfile.initrd,
        runfile.initrd_gzipped,
        Path::new("."),
    ) {
        Ok(module) => module,
        Err(e) => {
            reporter.error(format!("Could not scan the initrd for kernel modules: {e}"));
            None
        }
    };
    fs::write(
        DEBUG_GDB_FILE,
        render_gdb_script(no_vmlinux, module.as_deref()),
    )?;

    fs::write(MAKEFILE_FILE, render_makefile(runfile))?;

    if Path::new(EXPLOIT_SRC_DIR).exists() {
        reporter.error(format!("'{EXPLOIT_SRC_DIR}' already exists. Skipping..."));
    } else {
        fs::create_dir(EXPLOIT_SRC_DIR)?;
        for (name, contents) in EXPLOIT_TEMPLATES {
            fs::write(Path::new(EXPLOIT_SRC_DIR).join(name), contents)?;
        }
    }

    // A user-modified makeroot is not worth fighting over.
    if fs::write(MAKEROOT_FILE, MAKEROOT_TEMPLATE).is_ok() {
        make_executable(MAKEROOT_FILE)?;
    }

    let handle = if no_vmlinux {
        None
    } else {
        Some(vmlinux::spawn_extraction(
            runfile.kernel.clone(),
            *reporter,
            token.clone(),
        ))
    };
    Ok(handle)
}

fn render_debug_script(runfile: &Runfile) -> String {
    format!(
        "#!/bin/sh\n# {GENERATED_SIGNATURE}\n{}\n",
        tokenizer::detokenize(&runfile.debug_tokens(), true)
    )
}

fn render_gdb_script(no_vmlinux: bool, module: Option<&Path>) -> String {
    let mut script = format!("# {GENERATED_SIGNATURE}\ntarget remote :1234\n");
    if !no_vmlinux {
        script.push_str("add-symbol-file vmlinux\n");
    }
    script.push_str("add-symbol-file exploit\n");
    if let Some(module) = module {
        script.push_str(&format!(
            "add-symbol-file {} {MODULE_LOAD_ADDRESS}\n",
            module.display()
        ));
    }
    script
}

fn render_makefile(runfile: &Runfile) -> String {
    let initrd = runfile.initrd.display().to_string();
    let plain = initrd.strip_suffix(".gz").unwrap_or(&initrd);
    let mut makefile = MAKEFILE_TEMPLATE.replace("CPIOFILE", plain);
    if runfile.initrd_gzipped {
        makefile = makefile.replace("#gzip", "gzip");
    }
    makefile
}

/// Writes the decompressed archive next to its `.gz`, keeping the original.
fn decompress_initrd(initrd: &Path) -> Result<()> {
    let raw = fs::read(initrd)?;
    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
    let name = initrd.display().to_string();
    let target = name.strip_suffix(".gz").unwrap_or(&name);
    fs::write(target, decoded)?;
    Ok(())
}

fn make_executable(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o775))?;
    }
    let _ = path;
    Ok(())
}

/// Removes files generated by an earlier run. Generated files are recognized
/// by their signature comment; anything without it stays untouched.
pub fn cleanup_files(reporter: &Reporter) -> Result<()> {
    // Best effort; the Makefile may already be gone.
    let _ = executor::run_quiet("make", &["clean"]);

    delete_signed(Path::new(DEBUG_RUNFILE), reporter);
    delete_signed(Path::new(MAKEFILE_FILE), reporter);
    delete_signed(Path::new(DEBUG_GDB_FILE), reporter);
    try_remove(Path::new(MAKEROOT_FILE), reporter);
    remove_exploit_src(Path::new(EXPLOIT_SRC_DIR), reporter)?;
    Ok(())
}

fn delete_signed(path: &Path, reporter: &Reporter) {
    if !path.is_file() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(contents) if contents.contains(GENERATED_SIGNATURE) => try_remove(path, reporter),
        Ok(_) => reporter.debug(format!(
            "Did not remove '{}'. Missing signature",
            path.display()
        )),
        Err(e) => reporter.debug(format!("Could not read '{}': {}", path.display(), e)),
    }
}

fn try_remove(path: &Path, reporter: &Reporter) {
    if let Err(e) = fs::remove_file(path) {
        reporter.debug(format!("Failed to remove '{}': {}", path.display(), e));
    }
}

/// Deletes the exploit skeleton, asking first when it no longer matches the
/// shipped template.
fn remove_exploit_src(dir: &Path, reporter: &Reporter) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !exploit_src_is_pristine(dir) {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "'{EXPLOIT_SRC_DIR}' differs from the template. Delete anyway?"
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            reporter.debug(format!("Keeping '{}'", dir.display()));
            return Ok(());
        }
    }
    fs::remove_dir_all(dir)?;
    Ok(())
}

fn exploit_src_is_pristine(dir: &Path) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).collect::<Vec<_>>(),
        Err(_) => return false,
    };
    if entries.len() != EXPLOIT_TEMPLATES.len() {
        return false;
    }
    EXPLOIT_TEMPLATES.iter().all(|(name, contents)| {
        fs::read_to_string(dir.join(name)).is_ok_and(|on_disk| on_disk == *contents)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runfile::Runfile;

    fn fixture_runfile(dir: &Path, command: &str, gzipped: bool) -> Runfile {
        let reporter = Reporter::default();
        let script = format!("#!/bin/sh\n{command}\n");
        let mut runfile = Runfile::from_script(&dir.join("run.sh"), &script, &reporter).unwrap();
        let cpio_name = if gzipped { "rootfs.cpio.gz" } else { "rootfs.cpio" };
        fs::write(dir.join(cpio_name), b"").unwrap();
        fs::write(dir.join("bzImage"), b"").unwrap();
        runfile.resolve_resources(dir, None, None).unwrap();
        runfile
    }

    #[test]
    fn test_debug_script_is_signed_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let runfile = fixture_runfile(tmp.path(), "qemu-system-x86_64 -m 128", false);
        let script = render_debug_script(&runfile);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(GENERATED_SIGNATURE));
        // The pretty rendering still tokenizes back to the debug variant.
        let body = script.lines().skip(2).collect::<Vec<_>>().join("\n");
        assert_eq!(
            crate::core::tokenizer::tokenize(&body).unwrap(),
            runfile.debug_tokens()
        );
    }

    #[test]
    fn test_makefile_substitution_strips_gz_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let runfile = fixture_runfile(tmp.path(), "qemu-system-x86_64 -m 128", true);
        let makefile = render_makefile(&runfile);
        assert!(makefile.contains("rootfs.cpio"));
        assert!(!makefile.contains("rootfs.cpio.gz"));
        assert!(!makefile.contains("#gzip"));

        let plain = fixture_runfile(tmp.path(), "qemu-system-x86_64 -m 128", false);
        assert!(render_makefile(&plain).contains("#gzip"));
    }

    #[test]
    fn test_gdb_script_contents() {
        let script = render_gdb_script(false, Some(Path::new("./vuln.ko")));
        assert!(script.contains("target remote :1234"));
        assert!(script.contains("add-symbol-file vmlinux"));
        assert!(script.contains(&format!("add-symbol-file ./vuln.ko {MODULE_LOAD_ADDRESS}")));

        let without = render_gdb_script(true, None);
        assert!(!without.contains("add-symbol-file vmlinux"));
        assert!(without.contains("add-symbol-file exploit"));
    }

    #[test]
    fn test_delete_signed_spares_unsigned_files() {
        let tmp = tempfile::tempdir().unwrap();
        let reporter = Reporter::default();
        let theirs = tmp.path().join("my-run.sh");
        fs::write(&theirs, "#!/bin/sh\necho hand-written\n").unwrap();
        delete_signed(&theirs, &reporter);
        assert!(theirs.exists());

        let ours = tmp.path().join("debug.gdb");
        fs::write(&ours, format!("# {GENERATED_SIGNATURE}\n")).unwrap();
        delete_signed(&ours, &reporter);
        assert!(!ours.exists());
    }

    #[test]
    fn test_exploit_src_pristine_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(EXPLOIT_SRC_DIR);
        fs::create_dir(&dir).unwrap();
        for (name, contents) in EXPLOIT_TEMPLATES {
            fs::write(dir.join(name), contents).unwrap();
        }
        assert!(exploit_src_is_pristine(&dir));

        fs::write(dir.join("exploit.c"), "int main(void) { return 0; }\n").unwrap();
        assert!(!exploit_src_is_pristine(&dir));
    }
}
