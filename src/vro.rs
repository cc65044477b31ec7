//! Streaming VOBU copy from a `VR_MOVIE.VRO` with inline MPEG-2
//! post-processing, and output naming for the extracted `.vob` files.

use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::{DateTime, Utc};
use log::warn;

use crate::ifo::{DvdVrError, Program, ProgramSet, Result, DVD_SECTOR_SIZE};
use crate::mpeg2::ProgramFixup;

/// Outcome of one program copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStats {
    /// Sectors accounted for, including skipped ones.
    pub sectors: u64,
    /// VOBUs abandoned because of read errors.
    pub failed_vobus: u32,
}

impl CopyStats {
    pub fn bytes(&self) -> u64 {
        self.sectors * DVD_SECTOR_SIZE as u64
    }
}

/// Copy one program's VOBU run from the VRO into `out`, fixing up each
/// 2048-byte sector through `fixup` on the way.
///
/// A VOBU that fails to read is abandoned whole (the VRO is re-seeked
/// to the next VOBU boundary) so one bad spot on the disc costs at most
/// one VOBU. Write errors are fatal. `after_vobu` runs once per VOBU
/// with the cumulative byte count, for drop-behind cache hinting.
pub fn copy_program<R, W, F>(
    vro: &mut R,
    out: &mut W,
    program: &Program,
    fixup: &mut ProgramFixup,
    mut after_vobu: F,
) -> Result<CopyStats>
where
    R: Read + Seek,
    W: Write,
    F: FnMut(u64),
{
    let mut stats = CopyStats::default();
    let mut pos = program.vob_offset as u64 * DVD_SECTOR_SIZE as u64;
    vro.seek(SeekFrom::Start(pos))?;

    let mut sector = [0u8; DVD_SECTOR_SIZE];
    for &vobu_size in &program.vobu_sizes {
        let vobu_bytes = vobu_size as u64 * DVD_SECTOR_SIZE as u64;
        let mut failed = false;
        for _ in 0..vobu_size {
            if let Err(e) = vro.read_exact(&mut sector) {
                warn!(
                    "read error in program {} near byte {}: {} - skipping VOBU",
                    program.number, pos, e
                );
                failed = true;
                break;
            }
            fixup.process_sector(&mut sector);
            out.write_all(&sector)?;
        }
        pos += vobu_bytes;
        if failed {
            stats.failed_vobus += 1;
            vro.seek(SeekFrom::Start(pos))?;
        }
        stats.sectors += vobu_size as u64;
        after_vobu(stats.bytes());
    }
    Ok(stats)
}

/// How extracted programs are named, per the `-n` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePolicy<'a> {
    /// Default: the program's recording timestamp.
    Timestamp,
    /// `-n -`: write the vob data to standard output.
    Stdout,
    /// `-n [label]`: derive from the program set title or label.
    Label,
    /// `-n NAME`: a fixed prefix.
    Base(&'a str),
}

impl<'a> NamePolicy<'a> {
    pub fn from_option(name: Option<&'a str>) -> Self {
        match name {
            None => NamePolicy::Timestamp,
            Some("-") => NamePolicy::Stdout,
            Some("[label]") => NamePolicy::Label,
            Some(base) => NamePolicy::Base(base),
        }
    }
}

const TIMESTAMP_FMT: &str = "%Y-%m-%d_%H:%M:%S";

/// Replace the characters that trip up shells and filesystems.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | ':' | '?' | '\\' => '-',
            other => other,
        })
        .collect()
}

/// Pick a base name (without `.vob`) for one program.
pub fn vob_base_name(
    policy: NamePolicy,
    program: &Program,
    set: Option<&ProgramSet>,
    now: DateTime<Utc>,
) -> Result<String> {
    match policy {
        NamePolicy::Stdout => Ok("-".to_string()),
        NamePolicy::Timestamp => {
            match program.timestamp.and_then(|t| t.to_datetime()) {
                Some(when) => Ok(when.format(TIMESTAMP_FMT).to_string()),
                // fall back to now + program number for uniqueness
                None => Ok(format!(
                    "{}#{:03}",
                    now.format(TIMESTAMP_FMT),
                    program.number
                )),
            }
        }
        NamePolicy::Label => {
            let set = set.ok_or(DvdVrError::NoUsableLabel)?;
            let base = label_base(set).ok_or(DvdVrError::NoUsableLabel)?;
            Ok(format!("{}#{:03}", base, program.number))
        }
        NamePolicy::Base(base) => Ok(format!("{}#{:03}", base, program.number)),
    }
}

/// Write the `title:`/`label:` info lines for a program set; the title
/// only when it adds anything over the label.
pub fn print_label_lines(info: &mut dyn Write, set: &ProgramSet) -> io::Result<()> {
    let title = set.title_string();
    let label = set.label_string();
    if !title.is_empty() && title != label {
        writeln!(info, "title: {}", title)?;
    }
    if !label.is_empty() && label != " " {
        writeln!(info, "label: {}", label)?;
    }
    Ok(())
}

/// A name from the set's title if it is distinct from the label,
/// otherwise from the label; `None` when neither carries anything.
pub fn label_base(set: &ProgramSet) -> Option<String> {
    let title = set.title_string();
    let label = set.label_string();
    if !title.is_empty() && title != label {
        return Some(sanitize_name(&title));
    }
    if !label.is_empty() && label != " " {
        return Some(sanitize_name(&label));
    }
    None
}
