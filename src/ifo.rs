//! DVD-VR management information (`VR_MANGR.IFO`). Everything in the
//! IFO is big-endian and packed; the file is small enough to hold in
//! memory, sized by the `vmg_ea` field of its 512-byte header.

use std::io::{self, Read};

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DvdVrError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid DVD-VR IFO identifier")]
    BadIdentifier,
    #[error("IFO truncated reading {what}")]
    Truncated { what: &'static str },
    #[error("couldn't find info table for VRO")]
    NoInfoTable,
    #[error("couldn't find specified program ({0})")]
    ProgramOutOfRange(u16),
    #[error("couldn't generate a name from the program set label")]
    NoUsableLabel,
}

pub type Result<T> = std::result::Result<T, DvdVrError>;

pub const DVD_SECTOR_SIZE: usize = 2048;

const IFO_ID: &[u8; 12] = b"DVD_RTR_VMG0";

fn be16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn be32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// The fixed 512-byte RTAV VMGI header.
#[derive(Debug, Clone)]
pub struct VmgMat {
    pub id: [u8; 12],
    pub vmg_ea: u32,
    pub vmgi_ea: u32,
    pub version: u16,
    pub txt_encoding: u8,
    pub disc_info1: [u8; 64],
    pub disc_info2: [u8; 64],
    pub pgit_sa: u32,
    pub cprm_supported: u8,
    pub cprm_title_key: [u8; 8],
    pub def_psi_sa: u32,
    pub txt_attr_sa: u32,
}

impl VmgMat {
    pub const LEN: usize = 512;

    pub fn read(bytes: &[u8]) -> Self {
        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes[0..12]);
        let mut disc_info1 = [0u8; 64];
        disc_info1.copy_from_slice(&bytes[98..162]);
        let mut disc_info2 = [0u8; 64];
        disc_info2.copy_from_slice(&bytes[162..226]);
        let mut cprm_title_key = [0u8; 8];
        cprm_title_key.copy_from_slice(&bytes[268..276]);
        Self {
            id,
            vmg_ea: be32(bytes, 12),
            vmgi_ea: be32(bytes, 28),
            version: be16(bytes, 32),
            txt_encoding: bytes[67],
            disc_info1,
            disc_info2,
            pgit_sa: be32(bytes, 256),
            cprm_supported: bytes[267],
            cprm_title_key,
            def_psi_sa: be32(bytes, 304),
            txt_attr_sa: be32(bytes, 352),
        }
    }

    /// `(major, minor)` from the low byte of the version field.
    pub fn format_version(&self) -> (u8, u8) {
        let v = (self.version & 0x00FF) as u8;
        (v >> 4, v & 0x0F)
    }
}

/// Character set named by the `txt_encoding` byte, per
/// VideoTextDataUsage. Nero writes 0x00, assumed ASCII.
pub fn text_encoding_name(txt_encoding: u8) -> &'static str {
    match txt_encoding {
        0x00 => "ASCII",
        0x01 => "ISO646-JP",
        0x10 => "JIS_C6220-1969-RO",
        0x11 => "ISO_8859-1",
        0x12 => "SHIFT_JIS",
        _ => "Unknown",
    }
}

/// Header of the program info table.
#[derive(Debug, Clone, Copy)]
pub struct Pgiti {
    pub nr_of_pgi: u8,
    pub nr_of_vob_formats: u8,
    pub pgit_ea: u32,
}

impl Pgiti {
    pub const LEN: usize = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvSystem {
    Ntsc,
    Pal,
}

impl TvSystem {
    pub fn name(&self) -> &'static str {
        match self {
            TvSystem::Ntsc => "NTSC",
            TvSystem::Pal => "PAL",
        }
    }
}

/// Decoded video attributes of a VOB format.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoAttr {
    pub tv_system: Option<TvSystem>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    /// Aspect in DVD-Video encoding (2 = 4:3, 3 = 16:9); `None` when
    /// the aspect or the compression format is unknown, which disables
    /// the MPEG-2 fixups downstream.
    pub aspect_code: Option<u8>,
    pub compression: Option<&'static str>,
}

impl VideoAttr {
    pub fn aspect_name(&self) -> Option<&'static str> {
        match self.aspect_code {
            Some(2) => Some("4:3"),
            Some(3) => Some("16:9"),
            _ => None,
        }
    }
}

pub fn parse_video_attr(video_attr: u16) -> VideoAttr {
    let resolution = (video_attr & 0x0038) >> 3;
    let aspect = (video_attr & 0x0C00) >> 10;
    let tv_sys = (video_attr & 0x3000) >> 12;
    let compression = (video_attr & 0xC000) >> 14;

    let tv_system = match tv_sys {
        0 => Some(TvSystem::Ntsc),
        1 => Some(TvSystem::Pal),
        _ => None,
    };
    let mut vert: u16 = match tv_system {
        Some(TvSystem::Ntsc) => 480,
        Some(TvSystem::Pal) => 576,
        None => 0,
    };
    let horiz: u16 = match resolution {
        0 => 720,
        1 => 704,
        2 => 352,
        3 => {
            vert /= 2;
            352
        }
        4 => 544,
        5 => 480,
        _ => 0,
    };

    let compression = match compression {
        0 => Some("MPEG1"),
        1 => Some("MPEG2"),
        _ => None,
    };
    let aspect_code = match aspect {
        // DVD-Video aspect encoding; unknown compression disables it
        0 | 1 if compression.is_some() => Some(aspect as u8 + 2),
        _ => None,
    };

    VideoAttr {
        tv_system,
        width: (horiz != 0 && vert != 0).then_some(horiz),
        height: (horiz != 0 && vert != 0).then_some(vert),
        aspect_code,
        compression,
    }
}

/// Decoded audio attributes (3 packed bytes).
#[derive(Debug, Clone, Copy)]
pub struct AudioAttr {
    pub coding: u8,
    pub channels: u8,
}

pub fn parse_audio_attr(bytes: [u8; 3]) -> AudioAttr {
    AudioAttr {
        coding: (bytes[0] & 0xE0) >> 5,
        channels: bytes[1] & 0x0F,
    }
}

impl AudioAttr {
    pub fn coding_name(&self) -> Option<&'static str> {
        match self.coding {
            0 => Some("Dolby AC-3"),
            2 => Some("MPEG-1"),
            3 => Some("MPEG-2ext"),
            4 => Some("Linear PCM"),
            _ => None,
        }
    }

    /// Channel count description; 9 encodes mono played as stereo.
    pub fn channels_desc(&self) -> Option<String> {
        match self.channels {
            0..=7 => Some(format!("{}", self.channels + 1)),
            9 => Some("2 (mono)".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VobFormat {
    pub video: VideoAttr,
    pub audio0: AudioAttr,
    pub audio1: AudioAttr,
}

impl VobFormat {
    pub const LEN: usize = 60;
}

/// A program's recording timestamp, unpacked from the 5-byte `pgtm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

/// Decode `pgtm`; a zero year means the recorder never set it.
pub fn parse_pgtm(pgtm: [u8; 5]) -> Option<ProgramTime> {
    let year = ((pgtm[0] as u16) << 8 | pgtm[1] as u16) >> 2;
    let month = (pgtm[1] & 0x03) << 2 | pgtm[2] >> 6;
    let day = (pgtm[2] & 0x3E) >> 1;
    let hour = (pgtm[2] & 0x01) << 4 | pgtm[3] >> 4;
    let min = (pgtm[3] & 0x0F) << 2 | pgtm[4] >> 6;
    let sec = pgtm[4] & 0x3F;
    if year == 0 {
        return None;
    }
    Some(ProgramTime {
        year,
        month,
        day,
        hour,
        min,
        sec,
    })
}

impl ProgramTime {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Some(
            NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
                .and_hms_opt(self.hour as u32, self.min as u32, self.sec as u32)?
                .and_utc(),
        )
    }

    pub fn to_unix(&self) -> Option<i64> {
        self.to_datetime().map(|dt| dt.timestamp())
    }
}

/// One program of the VRO: identity, recording time, and its VOBU map.
#[derive(Debug, Clone)]
pub struct Program {
    /// 1-based program number.
    pub number: u16,
    pub vob_attr: u16,
    /// 1-based index into the VOB format table.
    pub format_id: u8,
    pub timestamp: Option<ProgramTime>,
    /// Start of the program's VOB in the VRO, in 2048-byte sectors.
    pub vob_offset: u32,
    pub time_offset: u16,
    /// Length of each VOBU in 2048-byte sectors.
    pub vobu_sizes: Vec<u16>,
}

impl Program {
    pub fn total_sectors(&self) -> u64 {
        self.vobu_sizes.iter().map(|&s| s as u64).sum()
    }
}

/// One program set of the default Program Set Info.
#[derive(Debug, Clone)]
pub struct ProgramSet {
    pub nr_of_programs: u16,
    pub label: [u8; 64],
    pub title: [u8; 64],
    pub prog_set_id: u16,
    pub first_prog_id: u16,
}

impl ProgramSet {
    pub const LEN: usize = 142;

    /// The label is plain ASCII, possibly unterminated.
    pub fn label_string(&self) -> String {
        decode_fixed_ascii(&self.label)
    }

    /// The title may be in the disc charset; decoded as UTF-8 with a
    /// Latin-1 byte fallback (charset conversion proper is out of
    /// scope here).
    pub fn title_string(&self) -> String {
        decode_fixed_text(&self.title)
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn decode_fixed_ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(trim_nul(bytes)).into_owned()
}

fn decode_fixed_text(bytes: &[u8]) -> String {
    let raw = trim_nul(bytes);
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_owned(),
        Err(_) => {
            warn!("text field is not valid UTF-8, falling back to Latin-1");
            raw.iter().map(|&b| b as char).collect()
        }
    }
}

/// Labels carrying no information, filtered from disc info output.
pub fn disc_info_redundant(info: &str) -> bool {
    matches!(info, "DVD VR" | "DVD-VR" | " " | "")
}

/// A fully loaded `VR_MANGR.IFO`.
pub struct Ifo {
    data: Vec<u8>,
    pub mat: VmgMat,
}

impl Ifo {
    /// Read the 512-byte header, then the rest of the VMG as sized by
    /// `vmg_ea`.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut head = vec![0u8; VmgMat::LEN];
        reader.read_exact(&mut head)?;
        let mat = VmgMat::read(&head);
        if &mat.id != IFO_ID {
            return Err(DvdVrError::BadIdentifier);
        }
        let vmg_size = mat.vmg_ea as usize + 1;
        let mut data = head;
        if vmg_size > data.len() {
            let mut rest = vec![0u8; vmg_size - data.len()];
            reader.read_exact(&mut rest)?;
            data.extend_from_slice(&rest);
        }
        Ok(Self { data, mat })
    }

    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < VmgMat::LEN {
            return Err(DvdVrError::Truncated { what: "VMGI header" });
        }
        let mat = VmgMat::read(&data);
        if &mat.id != IFO_ID {
            return Err(DvdVrError::BadIdentifier);
        }
        Ok(Self { data, mat })
    }

    fn slice(&self, offset: usize, len: usize, what: &'static str) -> Result<&[u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or(DvdVrError::Truncated { what })
    }

    /// The program info table header at `pgit_sa`.
    pub fn pgiti(&self) -> Result<Pgiti> {
        let at = self.mat.pgit_sa as usize;
        let bytes = self.slice(at, Pgiti::LEN, "program info table")?;
        let pgiti = Pgiti {
            nr_of_pgi: bytes[2],
            nr_of_vob_formats: bytes[3],
            pgit_ea: be32(bytes, 4),
        };
        if pgiti.nr_of_pgi == 0 {
            return Err(DvdVrError::NoInfoTable);
        }
        if pgiti.nr_of_pgi > 1 {
            warn!(
                "only processing 1 of the {} VRO info tables",
                pgiti.nr_of_pgi
            );
        }
        Ok(pgiti)
    }

    /// VOB format records directly after the table header.
    pub fn vob_formats(&self, pgiti: &Pgiti) -> Result<Vec<VobFormat>> {
        let mut formats = Vec::with_capacity(pgiti.nr_of_vob_formats as usize);
        for i in 0..pgiti.nr_of_vob_formats as usize {
            let at = self.mat.pgit_sa as usize + Pgiti::LEN + i * VobFormat::LEN;
            let bytes = self.slice(at, VobFormat::LEN, "vob format")?;
            formats.push(VobFormat {
                video: parse_video_attr(be16(bytes, 0)),
                audio0: parse_audio_attr([bytes[4], bytes[5], bytes[6]]),
                audio1: parse_audio_attr([bytes[7], bytes[8], bytes[9]]),
            });
        }
        Ok(formats)
    }

    /// All programs, with their VOBU maps decoded.
    pub fn programs(&self, pgiti: &Pgiti) -> Result<Vec<Program>> {
        let pgi_gi_at =
            self.mat.pgit_sa as usize + Pgiti::LEN + pgiti.nr_of_vob_formats as usize * VobFormat::LEN;
        let count = be16(self.slice(pgi_gi_at, 2, "program count")?, 0);

        let mut programs = Vec::with_capacity(count as usize);
        for index in 0..count as usize {
            let sa_at = pgi_gi_at + 2 + index * 4;
            // VVOB info addresses are relative to the program info table
            let vvob_at =
                self.mat.pgit_sa as usize + be32(self.slice(sa_at, 4, "vvob address")?, 0) as usize;
            programs.push(self.parse_program(index as u16 + 1, vvob_at)?);
        }
        Ok(programs)
    }

    fn parse_program(&self, number: u16, vvob_at: usize) -> Result<Program> {
        let vvob = self.slice(vvob_at, 21, "virtual vob info")?;
        let vob_attr = be16(vvob, 0);
        let pgtm = [vvob[2], vvob[3], vvob[4], vvob[5], vvob[6]];
        let format_id = vvob[8];

        let mut at = vvob_at + 21;
        if vob_attr & 0x80 != 0 {
            // adjacent VOB info precedes the map
            at += 12;
        }
        at += 2;

        let map = self.slice(at, 10, "vobu map")?;
        let nr_of_time_info = be16(map, 0);
        let nr_of_vobu_info = be16(map, 2);
        let time_offset = be16(map, 4);
        let vob_offset = be32(map, 6);
        at += 10 + nr_of_time_info as usize * 7;

        let vobu = self.slice(at, nr_of_vobu_info as usize * 3, "vobu info")?;
        let vobu_sizes = vobu
            .chunks_exact(3)
            .map(|c| be16(c, 1) & 0x03FF)
            .collect();

        Ok(Program {
            number,
            vob_attr,
            format_id,
            timestamp: parse_pgtm(pgtm),
            vob_offset,
            time_offset,
            vobu_sizes,
        })
    }

    /// The default Program Set Info at `def_psi_sa`.
    pub fn program_sets(&self) -> Result<Vec<ProgramSet>> {
        let at = self.mat.def_psi_sa as usize;
        let gi = self.slice(at, 4, "program set info")?;
        let nr_of_psi = gi[1];
        let mut sets = Vec::with_capacity(nr_of_psi as usize);
        for i in 0..nr_of_psi as usize {
            let bytes = self.slice(at + 4 + i * ProgramSet::LEN, ProgramSet::LEN, "program set")?;
            let mut label = [0u8; 64];
            label.copy_from_slice(&bytes[4..68]);
            let mut title = [0u8; 64];
            title.copy_from_slice(&bytes[68..132]);
            sets.push(ProgramSet {
                nr_of_programs: be16(bytes, 2),
                label,
                title,
                prog_set_id: be16(bytes, 132),
                first_prog_id: be16(bytes, 134),
            });
        }
        Ok(sets)
    }

    /// Disc info labels worth showing, decoded and de-duplicated.
    pub fn disc_info(&self) -> Vec<String> {
        let mut out = Vec::new();
        let info2 = decode_fixed_text(&self.mat.disc_info2);
        if !disc_info_redundant(&info2) {
            out.push(info2);
        }
        if self.mat.disc_info1 != self.mat.disc_info2 {
            let info1 = decode_fixed_text(&self.mat.disc_info1);
            if !disc_info_redundant(&info1) {
                out.push(info1);
            }
        }
        out
    }
}

/// Resolve which program set a 1-based program number belongs to.
///
/// `first_prog_id` cannot be trusted across authorings (LG and Cirrus
/// Logic discs leave it 0 or 0xFFFF), so a running count over the set
/// array decides.
pub fn find_program_set<'a>(sets: &'a [ProgramSet], program: u16) -> Option<&'a ProgramSet> {
    let mut program_count = 0u16;
    for set in sets {
        let start = program_count + 1;
        let end = program_count + set.nr_of_programs;
        program_count = end;
        if program >= start && program <= end {
            return Some(set);
        }
    }
    None
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Inverse of [`parse_pgtm`] for round-trip testing.
    pub fn encode_pgtm(t: &ProgramTime) -> [u8; 5] {
        let mut b = [0u8; 5];
        b[0] = (t.year >> 6) as u8;
        b[1] = ((t.year << 2) as u8) | (t.month >> 2);
        b[2] = (t.month << 6) | (t.day << 1) | (t.hour >> 4);
        b[3] = (t.hour << 4) | (t.min >> 2);
        b[4] = (t.min << 6) | t.sec;
        b
    }

    /// Build a minimal IFO: one VOB format, `programs` with one VOBU
    /// map each, one program set labelled per `label`.
    pub fn build_ifo(
        video_attr: u16,
        cprm: bool,
        programs: &[(Option<ProgramTime>, u32, &[u16])],
        label: &str,
    ) -> Vec<u8> {
        let pgit_sa = 512u32;
        let mut data = vec![0u8; 512];
        data[0..12].copy_from_slice(IFO_ID);
        data[32..34].copy_from_slice(&0x0011u16.to_be_bytes()); // V1.1
        data[256..260].copy_from_slice(&pgit_sa.to_be_bytes());
        if cprm {
            data[267] = 1;
        }

        // program info table: header + 1 vob format
        let mut pgit = vec![0u8; Pgiti::LEN];
        pgit[2] = 1; // nr_of_pgi
        pgit[3] = 1; // nr_of_vob_formats
        let mut fmt = vec![0u8; VobFormat::LEN];
        fmt[0..2].copy_from_slice(&video_attr.to_be_bytes());
        fmt[4] = 0x00; // AC-3
        fmt[5] = 0x01; // 2 channels
        pgit.extend_from_slice(&fmt);

        // program vector
        pgit.extend_from_slice(&(programs.len() as u16).to_be_bytes());
        let vvobi_table_at = pgit.len();
        pgit.extend_from_slice(&vec![0u8; programs.len() * 4]);

        for (i, (ts, vob_offset, vobu_sizes)) in programs.iter().enumerate() {
            let vvob_at = pgit.len() as u32;
            pgit[vvobi_table_at + i * 4..vvobi_table_at + i * 4 + 4]
                .copy_from_slice(&vvob_at.to_be_bytes());
            let mut vvob = vec![0u8; 21];
            if let Some(ts) = ts {
                vvob[2..7].copy_from_slice(&encode_pgtm(ts));
            }
            vvob[8] = 1; // format id
            pgit.extend_from_slice(&vvob);
            pgit.extend_from_slice(&[0u8; 2]); // unknown gap before the map
            pgit.extend_from_slice(&0u16.to_be_bytes()); // nr_of_time_info
            pgit.extend_from_slice(&(vobu_sizes.len() as u16).to_be_bytes());
            pgit.extend_from_slice(&0u16.to_be_bytes()); // time_offset
            pgit.extend_from_slice(&vob_offset.to_be_bytes());
            for &size in vobu_sizes.iter() {
                pgit.push(0);
                pgit.extend_from_slice(&(size & 0x03FF).to_be_bytes());
            }
        }
        data.extend_from_slice(&pgit);

        // default program set info
        let def_psi_sa = data.len() as u32;
        data[304..308].copy_from_slice(&def_psi_sa.to_be_bytes());
        let mut psi_gi = vec![0u8; 4];
        psi_gi[1] = 1; // nr_of_psi
        psi_gi[2..4].copy_from_slice(&(programs.len() as u16).to_be_bytes());
        data.extend_from_slice(&psi_gi);
        let mut psi = vec![0u8; ProgramSet::LEN];
        psi[2..4].copy_from_slice(&(programs.len() as u16).to_be_bytes());
        psi[4..4 + label.len()].copy_from_slice(label.as_bytes());
        data.extend_from_slice(&psi);

        let vmg_ea = (data.len() - 1) as u32;
        data[12..16].copy_from_slice(&vmg_ea.to_be_bytes());
        data
    }

    #[test]
    fn pgtm_roundtrip() {
        let samples = [
            ProgramTime {
                year: 2007,
                month: 12,
                day: 31,
                hour: 23,
                min: 59,
                sec: 59,
            },
            ProgramTime {
                year: 1,
                month: 1,
                day: 1,
                hour: 0,
                min: 0,
                sec: 0,
            },
            ProgramTime {
                year: 16383,
                month: 12,
                day: 31,
                hour: 23,
                min: 59,
                sec: 63,
            },
        ];
        for t in samples {
            assert_eq!(parse_pgtm(encode_pgtm(&t)), Some(t));
        }
    }

    #[test]
    fn pgtm_zero_year_is_unset() {
        assert_eq!(parse_pgtm([0; 5]), None);
    }

    #[test]
    fn video_attr_decoding() {
        // PAL, 720 wide, 16:9, MPEG2
        let attr = parse_video_attr(0x1000 | 0x0400 | 0x4000);
        assert_eq!(attr.tv_system, Some(TvSystem::Pal));
        assert_eq!(attr.width, Some(720));
        assert_eq!(attr.height, Some(576));
        assert_eq!(attr.aspect_code, Some(3));
        assert_eq!(attr.aspect_name(), Some("16:9"));
        assert_eq!(attr.compression, Some("MPEG2"));

        // half-height NTSC
        let attr = parse_video_attr(0x0018 | 0x4000);
        assert_eq!(attr.width, Some(352));
        assert_eq!(attr.height, Some(240));

        // unknown compression disables the aspect fix
        let attr = parse_video_attr(0x0400 | 0x8000);
        assert_eq!(attr.compression, None);
        assert_eq!(attr.aspect_code, None);
    }

    #[test]
    fn audio_attr_decoding() {
        let a = parse_audio_attr([0x00, 0x01, 0x07]);
        assert_eq!(a.coding_name(), Some("Dolby AC-3"));
        assert_eq!(a.channels_desc().unwrap(), "2");

        let mono = parse_audio_attr([0x40, 0x09, 0x00]);
        assert_eq!(mono.coding_name(), None);
        assert_eq!(mono.channels_desc().unwrap(), "2 (mono)");
    }

    #[test]
    fn running_count_resolves_program_sets() {
        let mut a = ProgramSet {
            nr_of_programs: 2,
            label: [0; 64],
            title: [0; 64],
            prog_set_id: 0,
            // deliberately wrong, as on LG V1.1 discs
            first_prog_id: 0xFFFF,
        };
        a.label[..1].copy_from_slice(b"A");
        let mut b = a.clone();
        b.nr_of_programs = 3;
        b.label[..1].copy_from_slice(b"B");
        let sets = vec![a, b];

        assert_eq!(find_program_set(&sets, 1).unwrap().label_string(), "A");
        assert_eq!(find_program_set(&sets, 2).unwrap().label_string(), "A");
        assert_eq!(find_program_set(&sets, 3).unwrap().label_string(), "B");
        assert_eq!(find_program_set(&sets, 5).unwrap().label_string(), "B");
        assert!(find_program_set(&sets, 6).is_none());
    }

    #[test]
    fn parse_minimal_ifo() {
        let ts = ProgramTime {
            year: 2008,
            month: 6,
            day: 15,
            hour: 20,
            min: 30,
            sec: 0,
        };
        let data = build_ifo(
            0x1000 | 0x0400 | 0x4000,
            true,
            &[(Some(ts), 100, &[4, 2]), (None, 200, &[1])],
            "HOLIDAY",
        );
        let ifo = Ifo::parse(data).unwrap();
        assert_eq!(ifo.mat.format_version(), (1, 1));
        assert_eq!(ifo.mat.cprm_supported, 1);

        let pgiti = ifo.pgiti().unwrap();
        assert_eq!(pgiti.nr_of_vob_formats, 1);
        let formats = ifo.vob_formats(&pgiti).unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].video.aspect_code, Some(3));

        let programs = ifo.programs(&pgiti).unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].number, 1);
        assert_eq!(programs[0].timestamp, Some(ts));
        assert_eq!(programs[0].vob_offset, 100);
        assert_eq!(programs[0].vobu_sizes, vec![4, 2]);
        assert_eq!(programs[0].total_sectors(), 6);
        assert_eq!(programs[1].timestamp, None);
        assert_eq!(programs[1].vobu_sizes, vec![1]);

        let sets = ifo.program_sets().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].label_string(), "HOLIDAY");
        assert_eq!(
            find_program_set(&sets, 2).unwrap().label_string(),
            "HOLIDAY"
        );
    }

    #[test]
    fn bad_identifier_rejected() {
        let mut data = vec![0u8; 512];
        data[0..12].copy_from_slice(b"DVD_RTR_XXX0");
        assert!(matches!(
            Ifo::parse(data),
            Err(DvdVrError::BadIdentifier)
        ));
    }
}
