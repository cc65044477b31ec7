//! In-place MPEG-2 Program Stream fixups applied while copying VOBU
//! sectors out of a VRO.
//!
//! Recorders leave the aspect in the sequence header at 4:3 for 16:9
//! material and instead set pan-scan sizes in the sequence display
//! extension, which players (and ffmpeg, since r15183) ignore when
//! deriving the aspect. The fix rewrites the sequence header aspect
//! from the IFO and resets the display-extension sizes to the coded
//! picture size. Scramble-control bits of the video PES are inspected
//! on the way through to flag CPRM-protected programs.

use crate::ifo::VideoAttr;

pub const SEQUENCE_ID: u8 = 0xB3;
pub const SEQUENCE_EXTENSION_ID: u8 = 0xB5;
/// Only E0 has been seen on DVD-VR discs (E0-EF possible).
pub const VIDEO_STREAM_0: u8 = 0xE0;

const MPEG_HEADER_LEN: usize = 4;
/// Payload bytes needed past a sequence header start code.
const SEQUENCE_LEN: usize = 4;
/// Payload bytes needed past a sequence extension start code.
const SEQUENCE_EXTENSION_LEN: usize = 5;
/// Payload bytes needed past a video PES start code.
const VIDEO_STREAM_LEN: usize = 3;

/// Find an MPEG start code `00 00 01 <id>`; `buf` must already be
/// truncated so that the needed payload fits after any hit.
pub fn find_start_code(buf: &[u8], id: u8) -> Option<usize> {
    buf.windows(4).position(|w| w == [0x00, 0x00, 0x01, id])
}

/// Per-program scrambling verdict. Only ever escalates:
/// `Unset -> Clear | Scrambled -> PartiallyScrambled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrambleState {
    Unset,
    Clear,
    Scrambled,
    PartiallyScrambled,
}

impl ScrambleState {
    pub fn record(&mut self, scrambled: bool) {
        *self = match (*self, scrambled) {
            (ScrambleState::Unset, false) => ScrambleState::Clear,
            (ScrambleState::Unset, true) => ScrambleState::Scrambled,
            (ScrambleState::Clear, true) => ScrambleState::PartiallyScrambled,
            (ScrambleState::Scrambled, false) => ScrambleState::PartiallyScrambled,
            (state, _) => state,
        };
    }
}

/// Mutable fixup state threaded through one program's VOBU loop.
pub struct ProgramFixup {
    target_aspect: Option<u8>,
    width: Option<u16>,
    height: Option<u16>,
    /// Sequence headers sit at one fixed in-sector offset throughout a
    /// program in every stream observed; cache it after the first find.
    sequence_offset: Option<usize>,
    sequence_aspect: u8,
    pub scramble: ScrambleState,
}

impl ProgramFixup {
    /// The aspect rewrite only runs for authored 16:9 with a known
    /// compression format; everything else passes through untouched.
    pub fn new(video: &VideoAttr) -> Self {
        Self {
            target_aspect: match video.aspect_code {
                Some(3) => Some(3),
                _ => None,
            },
            width: video.width,
            height: video.height,
            sequence_offset: None,
            sequence_aspect: 0xFF,
            scramble: ScrambleState::Unset,
        }
    }

    /// Apply all per-sector processing, in order: aspect fix, display
    /// extension fix, scramble detection.
    pub fn process_sector(&mut self, buf: &mut [u8]) {
        self.fix_aspect(buf);
        self.check_scrambling(buf);
    }

    fn fix_aspect(&mut self, buf: &mut [u8]) {
        let Some(target) = self.target_aspect else {
            return;
        };
        if buf.len() < MPEG_HEADER_LEN + SEQUENCE_LEN {
            return;
        }

        let mut found_sequence_header = false;
        match self.sequence_offset {
            None => {
                if let Some(offset) =
                    find_start_code(&buf[..buf.len() - SEQUENCE_LEN], SEQUENCE_ID)
                {
                    found_sequence_header = true;
                    self.sequence_offset = Some(offset);
                    self.sequence_aspect = buf[offset + MPEG_HEADER_LEN + 3] >> 4;
                    if self.sequence_aspect != target {
                        set_sequence_aspect(buf, offset, target);
                    }
                }
            }
            Some(offset) => {
                // sequence headers repeat at the cached offset; sectors
                // without one are not rescanned
                if buf.len() >= offset + MPEG_HEADER_LEN + SEQUENCE_LEN
                    && buf[offset..offset + 4] == [0x00, 0x00, 0x01, SEQUENCE_ID]
                {
                    found_sequence_header = true;
                    if self.sequence_aspect != target {
                        set_sequence_aspect(buf, offset, target);
                    }
                }
            }
        }

        if !found_sequence_header {
            return;
        }
        let (Some(width), Some(height)) = (self.width, self.height) else {
            return;
        };
        // a display extension only ever follows a sequence header in
        // the same sector
        let mut extension_offset =
            self.sequence_offset.unwrap() + MPEG_HEADER_LEN + SEQUENCE_LEN;
        while extension_offset + SEQUENCE_EXTENSION_LEN < buf.len() {
            let window = &buf[extension_offset..buf.len() - SEQUENCE_EXTENSION_LEN];
            let Some(next) = find_start_code(window, SEQUENCE_EXTENSION_ID) else {
                break;
            };
            extension_offset += next;
            let extension_type = buf[extension_offset + MPEG_HEADER_LEN];
            if extension_type & 0xF0 == 0x20 {
                set_display_extension_sizes(buf, extension_offset, width, height);
                // only one per sector
                break;
            }
            extension_offset += 1;
        }
    }

    fn check_scrambling(&mut self, buf: &mut [u8]) {
        if self.scramble == ScrambleState::PartiallyScrambled {
            return;
        }
        if buf.len() < MPEG_HEADER_LEN + VIDEO_STREAM_LEN {
            return;
        }
        if let Some(offset) = find_start_code(&buf[..buf.len() - VIDEO_STREAM_LEN], VIDEO_STREAM_0)
        {
            let flags = buf[offset + MPEG_HEADER_LEN + 2];
            // the scramble control bits are only meaningful on an
            // MPEG-2 PES header; MPEG-1 cannot be encrypted
            let scrambled = flags & 0xC0 == 0x80 && flags & 0x30 != 0;
            self.scramble.record(scrambled);
        }
    }
}

fn set_sequence_aspect(buf: &mut [u8], offset: usize, aspect: u8) {
    let byte = &mut buf[offset + MPEG_HEADER_LEN + 3];
    *byte = (*byte & 0x0F) | (aspect << 4);
}

/// Overwrite the 14-bit horizontal and vertical display sizes of a
/// sequence display extension, bit-packed over a `00 02 00 00`
/// template (the 0x02 is the marker bit between them).
fn set_display_extension_sizes(buf: &mut [u8], offset: usize, width: u16, height: u16) {
    let extension_type = buf[offset + MPEG_HEADER_LEN];
    let skip_colour = if extension_type & 0x01 != 0 { 3 } else { 0 };
    let at = offset + MPEG_HEADER_LEN + skip_colour + 1;
    let Some(ds) = buf.get_mut(at..at + 4) else {
        return;
    };
    ds.copy_from_slice(&[0x00, 0x02, 0x00, 0x00]);
    ds[0] |= (width >> 6) as u8;
    ds[1] |= (width << 2) as u8;
    ds[1] |= ((height >> 13) & 0x01) as u8;
    ds[2] |= (height >> 5) as u8;
    ds[3] |= (height << 3) as u8;
}

/// Read the display sizes back out; the inverse of the setter.
pub fn display_extension_sizes(buf: &[u8], offset: usize) -> (u16, u16) {
    let extension_type = buf[offset + MPEG_HEADER_LEN];
    let skip_colour = if extension_type & 0x01 != 0 { 3 } else { 0 };
    let ds = &buf[offset + MPEG_HEADER_LEN + skip_colour + 1..];
    let width = (ds[0] as u16) << 6 | (ds[1] as u16) >> 2;
    let height = ((ds[1] as u16) & 0x01) << 13 | (ds[2] as u16) << 5 | (ds[3] as u16) >> 3;
    (width, height)
}
