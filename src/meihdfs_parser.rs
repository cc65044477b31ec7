use std::io::{self, Read, Seek, Write};
use std::path::Path;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::device::ImageReader;
use crate::meihdfs::{
    Directory, EntryType, Inode, Itbl, ASIZE, BCNT, BSIZE, DIR_ENTRIES_FIRST, GSIZE, ISIZE,
    ITABLES_V20, ITABLES_V23, ITBL_ENTRIES, ITBL_SEARCH_WINDOW, ITBL_START, TIME_OFFSET,
};
use crate::sink;

#[derive(Error, Debug)]
pub enum MeihdfsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("no MEIHDFS header found (last probed offset {last_offset:#x})")]
    HeaderNotFound { last_offset: u64 },
    #[error("bad magic {magic:#010x} @{offset:#x}")]
    BadMagic { offset: u64, magic: u32 },
    #[error("inode {inode_id} exceeds size of available inode tables")]
    InodeOutOfRange { inode_id: u32 },
    #[error("inode {inode_id} is truncated and no shadow table repairs it")]
    TruncatedInode { inode_id: u32 },
}

pub type Result<T> = std::result::Result<T, MeihdfsError>;

/// Stride of the superblock header search.
const HEADER_STRIDE: u64 = 0x10000;

/// An opened MEIHDFS image: located superblock, loaded inode tables.
#[derive(Debug)]
pub struct Meihdfs<R: Read + Seek> {
    image: ImageReader<R>,
    start: u64,
    version: u8,
    itables: usize,
    tables: Vec<Itbl>,
}

impl<R: Read + Seek> Meihdfs<R> {
    /// Scan for the filesystem header from `seed_offset` and load the
    /// inode tables.
    pub fn open(image: ImageReader<R>, seed_offset: u64) -> Result<Self> {
        let mut image = image;
        let (start, version) = search_header(&mut image, seed_offset)?;
        let itables = if version < 3 { ITABLES_V20 } else { ITABLES_V23 };
        info!(
            "MEIHDFS V2.{} header @{:#x}, {} inode tables",
            version, start, itables
        );
        let tables = read_inode_tables(&mut image, start, itables)?;
        Ok(Self {
            image,
            start,
            version,
            itables,
            tables,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Recorded times are 1980-based before version 3.
    fn file_time(&self, time: u32) -> i64 {
        time as i64 + if self.version < 3 { TIME_OFFSET } else { 0 }
    }

    /// List every file to stdout without writing anything.
    pub fn list(&mut self) -> Result<()> {
        self.walk_root(None)
    }

    /// Mirror the directory tree under `outdir`.
    pub fn extract_to(&mut self, outdir: &Path) -> Result<()> {
        self.walk_root(Some(outdir))
    }

    fn walk_root(&mut self, outdir: Option<&Path>) -> Result<()> {
        let offset = self.inode_position(0)?;
        let root = Directory::read(&self.read_node_block(offset)?);
        if !root.is_root() {
            error!(
                "root directory @{:#x} doesn't have valid rootdir magic (magic = {:#010x})",
                offset, root.magic
            );
            return Err(MeihdfsError::BadMagic {
                offset,
                magic: root.magic,
            });
        }
        let base = outdir.unwrap_or(Path::new(".")).to_path_buf();
        self.walk_dir(&root, offset, &base, outdir.is_none())
    }

    fn read_node_block(&mut self, offset: u64) -> Result<Vec<u8>> {
        let mut block = vec![0u8; ISIZE];
        self.image.read_exact_at(offset, &mut block)?;
        Ok(block)
    }

    /// Byte position of an inode in the image, resolved through the
    /// primary tables.
    fn inode_position(&self, inode_id: u32) -> Result<u64> {
        Ok(self.start + table_offset(&self.tables, inode_id)? * ISIZE as u64)
    }

    /// Walk one directory: the embedded first page, then `item_len - 1`
    /// follow-on pages. A corrupt entry name ends this directory but not
    /// its parent.
    fn walk_dir(&mut self, dir: &Directory, dir_offset: u64, out: &Path, list: bool) -> Result<()> {
        for page_index in 0..dir.item_len as u64 {
            let entries = if page_index == 0 {
                dir.entries[..DIR_ENTRIES_FIRST].to_vec()
            } else {
                Directory::read_page(&self.read_node_block(dir_offset + page_index * ISIZE as u64)?)
            };
            for entry in &entries {
                if !entry.is_live() {
                    continue;
                }
                if entry.name_overflows() {
                    warn!("filename length exceeds directory entry size, ending directory traversal");
                    return Ok(());
                }
                let inode_offset = self.inode_position(entry.inode_id)?;
                let block = self.read_node_block(inode_offset)?;
                let path = out.join(entry.name());
                match entry.entry_type {
                    EntryType::File => {
                        let inode = Inode::read(&block);
                        if !inode.magic_valid() {
                            error!(
                                "inode {} is not a file inode (magic={:#010x})",
                                entry.inode_id, inode.magic
                            );
                            return Err(MeihdfsError::BadMagic {
                                offset: inode_offset,
                                magic: inode.magic,
                            });
                        }
                        let inode = self.resolve_truncated(entry.inode_id, inode)?;
                        self.emit_file(&inode, &path, list);
                    }
                    EntryType::Directory => {
                        let subdir = Directory::read(&block);
                        if !subdir.magic_valid() {
                            error!(
                                "inode {} is not a directory (magic={:#010x})",
                                entry.inode_id, subdir.magic
                            );
                            return Err(MeihdfsError::BadMagic {
                                offset: inode_offset,
                                magic: subdir.magic,
                            });
                        }
                        if !list {
                            sink::create_dir(&path)?;
                        }
                        // a damaged subtree must not stop the siblings
                        if let Err(e) = self.walk_dir(&subdir, inode_offset, &path, list) {
                            error!("abandoning directory {}: {}", path.display(), e);
                        }
                        if !list {
                            let mtime = self.file_time(subdir.time1);
                            if let Err(e) = sink::set_file_times(&path, mtime) {
                                warn!("cannot set times on {}: {}", path.display(), e);
                            }
                        }
                    }
                    EntryType::Unknown(t) => {
                        warn!("dir entry {} has unknown type {}", entry.name(), t);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_file(&mut self, inode: &Inode, path: &Path, list: bool) {
        let mtime = self.file_time(inode.time1);
        println!("{}", sink::format_list_line(mtime, inode.file_size(), path));
        if list {
            return;
        }
        if sink::already_dumped(path, mtime, inode.file_size()) {
            info!("skipping previously dumped file {}", path.display());
            return;
        }
        // keep going with the remaining entries when one file fails
        if let Err(e) = self.dump_file(inode, path) {
            error!("error dumping {}: {}", path.display(), e);
            return;
        }
        if let Err(e) = sink::set_file_times(path, mtime) {
            warn!("cannot set times on {}: {}", path.display(), e);
        }
    }

    /// An inode whose first run is empty while its size is not has lost
    /// its run list; re-resolve it through the mirror superblocks at
    /// `GSIZE * ASIZE` multiples until one yields a usable copy.
    fn resolve_truncated(&mut self, inode_id: u32, primary: Inode) -> Result<Inode> {
        if primary.file_size() == 0 || !primary.runs[0].is_empty() {
            return Ok(primary);
        }
        let primary_offset = table_offset(&self.tables, inode_id)?;
        for mirror in 1u64.. {
            let base = self.start + mirror * GSIZE * ASIZE as u64;
            let shadow = match read_inode_tables(&mut self.image, base, self.itables) {
                Ok(tables) => tables,
                Err(_) => break,
            };
            let offset = table_offset(&shadow, inode_id)?;
            if offset == primary_offset {
                continue;
            }
            debug!(
                "shadow table {} remaps inode {} to {:#x}",
                mirror, inode_id, offset
            );
            let block = self.read_node_block(self.start + offset * ISIZE as u64)?;
            let alternate = Inode::read(&block);
            if !alternate.runs[0].is_empty() {
                info!("recovered inode {} from shadow table {}", inode_id, mirror);
                return Ok(alternate);
            }
        }
        Err(MeihdfsError::TruncatedInode { inode_id })
    }

    /// Stream the inode's runs into `path`, in [`ASIZE`] windows,
    /// truncating to the recorded file size.
    fn dump_file(&mut self, inode: &Inode, path: &Path) -> Result<()> {
        let mut file = sink::create_file(path)?;
        let mut remaining = inode.file_size();
        // the run multiplier only exists on V2.3+ filesystems
        let factor = if self.version >= 3 {
            inode.run_factor()
        } else {
            1
        };
        let mut buf = vec![0u8; ASIZE];
        for (index, run) in inode.runs.iter().enumerate() {
            if run.is_empty() || remaining == 0 {
                break;
            }
            debug!(
                "copying run {:02} starting at block {:08X} with len {:08X}",
                index, run.start, run.len
            );
            self.image.seek_to(self.start + run.byte_offset())?;
            // run lengths count 512-byte units
            let mut units = run.len as u64 * factor;
            while units > 0 && remaining > 0 {
                let chunk_units = units.min((BCNT * 4) as u64);
                let chunk_bytes = (chunk_units * (BSIZE / 4) as u64) as usize;
                self.image.read_recoverable(&mut buf[..chunk_bytes])?;
                let write_len = (chunk_bytes as u64).min(remaining) as usize;
                file.write_all(&buf[..write_len])?;
                remaining -= write_len as u64;
                units -= chunk_units;
            }
        }
        Ok(())
    }
}

/// Probe every 64 KiB for the superblock magic; returns the image start
/// and the filesystem major version.
fn search_header<R: Read + Seek>(image: &mut ImageReader<R>, seed: u64) -> Result<(u64, u8)> {
    let mut offset = seed;
    let mut probe = [0u8; 32];
    loop {
        match image.read_exact_at(offset, &mut probe) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(MeihdfsError::HeaderNotFound {
                    last_offset: offset,
                });
            }
            Err(e) => return Err(e.into()),
        }
        debug!("searching MEIHDFS header @{:#010x}", offset);
        if &probe[8..19] == b"MEIHDFS-V2." {
            return Ok((offset, probe[19].wrapping_sub(b'0')));
        }
        if &probe[8..14] == b"HDFS2." {
            return Ok((offset, probe[14].wrapping_sub(b'0')));
        }
        offset += HEADER_STRIDE;
    }
}

/// Find the inode tables by pattern matching: they are not referenced
/// from the superblock. Candidates are probed at 4 KiB strides through a
/// 128 KiB window past [`ITBL_START`]; the result is padded with zeroed
/// tables when fewer than `itables` are found.
fn read_inode_tables<R: Read + Seek>(
    image: &mut ImageReader<R>,
    start: u64,
    itables: usize,
) -> Result<Vec<Itbl>> {
    let mut tables: Vec<Itbl> = Vec::with_capacity(itables);
    let mut buf = vec![0u8; Itbl::LEN];
    let mut probe = 0u64;
    while probe < ITBL_SEARCH_WINDOW && tables.len() < itables {
        image.read_exact_at(start + ITBL_START + probe, &mut buf)?;
        let candidate = Itbl::read(&buf);
        if accept_table(tables.len(), &candidate) {
            info!(
                "inode table #{}/{} found @{:#010x}",
                tables.len() + 1,
                itables,
                start + ITBL_START + probe
            );
            tables.push(candidate);
        }
        probe += ISIZE as u64;
    }
    if tables.len() < itables {
        warn!("cannot find all inode tables");
        tables.resize_with(itables, Itbl::zeroed);
    }
    Ok(tables)
}

/// Acceptance heuristic for an inode-table candidate. After the first
/// accepted table the header check is waived, except at position 3.
fn accept_table(accepted: usize, candidate: &Itbl) -> bool {
    if (accepted > 0 && accepted != 3) || candidate.header_matches() {
        if candidate.generation != 0 {
            candidate.has_live_entry()
        } else {
            true
        }
    } else {
        false
    }
}

/// Inode position in `ISIZE` units relative to the image start, as
/// recorded by a table set.
fn table_offset(tables: &[Itbl], inode_id: u32) -> Result<u64> {
    let table = inode_id as usize / ITBL_ENTRIES;
    if table >= tables.len() {
        return Err(MeihdfsError::InodeOutOfRange { inode_id });
    }
    Ok(tables[table].entries[inode_id as usize % ITBL_ENTRIES].inode_offset())
}
