// src/core/cpio.rs

use anyhow::{Result, anyhow, bail};
use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::core::paths;

lazy_static! {
    // Modules under lib/modules/<version>/kernel/ ship with the distribution
    // and are not the challenge module.
    static ref DIST_MODULE_RE: Regex = Regex::new(r"^lib/modules/[^/]+/kernel/").unwrap();
}

const NEWC_MAGICS: [&[u8; 6]; 2] = [b"070701", b"070702"];
const NEWC_HEADER_LEN: usize = 110;
const NEWC_TRAILER: &str = "TRAILER!!!";

/// Locates the challenge kernel module: a `.ko` already lying in `dir`, or
/// the first non-distribution `.ko` inside the initrd archive, extracted into
/// `dir`. Returns `None` when the challenge ships no module.
pub fn extract_challenge_module(
    initrd: &Path,
    gzipped: bool,
    dir: &Path,
) -> Result<Option<PathBuf>> {
    if let Some(existing) = paths::find_module(dir) {
        return Ok(Some(existing));
    }

    let raw = fs::read(initrd)?;
    let data = if gzipped {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
        decoded
    } else {
        raw
    };

    let Some((name, contents)) = scan_archive(&data)? else {
        return Ok(None);
    };
    let filename = Path::new(&name)
        .file_name()
        .ok_or_else(|| anyhow!("Archive entry '{name}' has no file name"))?
        .to_owned();
    let target = dir.join(&filename);
    fs::write(&target, contents)?;
    Ok(Some(target))
}

/// Walks a newc cpio archive and returns the name and contents of the first
/// `.ko` entry that is not a distribution module.
fn scan_archive(data: &[u8]) -> Result<Option<(String, Vec<u8>)>> {
    let mut offset = 0usize;
    loop {
        let header = data
            .get(offset..offset + NEWC_HEADER_LEN)
            .ok_or_else(|| anyhow!("Truncated cpio header at offset {offset}"))?;
        if !NEWC_MAGICS.iter().any(|magic| header.starts_with(*magic)) {
            bail!("Not a newc cpio archive (bad magic at offset {offset})");
        }
        let file_size = hex_field(header, 6 + 6 * 8)?;
        let name_size = hex_field(header, 6 + 11 * 8)?;

        let name_start = offset + NEWC_HEADER_LEN;
        let name_bytes = data
            .get(name_start..name_start + name_size)
            .ok_or_else(|| anyhow!("Truncated cpio entry name at offset {name_start}"))?;
        let name = std::str::from_utf8(name_bytes)?
            .trim_end_matches('\0')
            .to_string();
        if name == NEWC_TRAILER {
            return Ok(None);
        }

        let data_start = align4(name_start + name_size);
        let contents = data
            .get(data_start..data_start + file_size)
            .ok_or_else(|| anyhow!("Truncated cpio entry data for '{name}'"))?;

        let normalized = name.trim_start_matches("./");
        if normalized.ends_with(".ko") && !DIST_MODULE_RE.is_match(normalized) {
            return Ok(Some((name, contents.to_vec())));
        }

        offset = align4(data_start + file_size);
    }
}

fn hex_field(header: &[u8], pos: usize) -> Result<usize> {
    let bytes = header
        .get(pos..pos + 8)
        .ok_or_else(|| anyhow!("Truncated cpio header field"))?;
    let text = std::str::from_utf8(bytes)?;
    Ok(usize::from_str_radix(text, 16)?)
}

const fn align4(value: usize) -> usize {
    (value + 3) & !3
}
