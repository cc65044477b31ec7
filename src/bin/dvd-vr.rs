use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use log::{error, warn};
use panarec::ifo::{
    find_program_set, text_encoding_name, DvdVrError, Ifo, Program, ProgramSet, Result, VobFormat,
};
use panarec::mpeg2::{ProgramFixup, ScrambleState};
use panarec::sink;
use panarec::vro::{copy_program, print_label_lines, vob_base_name, NamePolicy};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Print info about and optionally extract vob data from DVD-VR files"
)]
struct Args {
    /// Only process program NUM rather than all programs
    #[arg(short, long, value_name = "NUM")]
    program: Option<u16>,

    /// Basename for extracted vob files instead of the recording
    /// timestamp; pass '-' to write vob data to stdout, or '[label]'
    /// to derive names from the program set title or label
    #[arg(short, long, value_name = "NAME")]
    name: Option<String>,

    /// The VR_MANGR.IFO management file
    ifo: PathBuf,

    /// The VR_MOVIE.VRO stream; when given, programs are extracted
    vro: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    if args.name.is_some() && args.vro.is_none() {
        error!("a name can only be used when a VRO file is given");
        std::process::exit(1);
    }
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let policy = NamePolicy::from_option(args.name.as_deref());

    // when vob data goes to stdout, the info channel moves to stderr
    let mut info: Box<dyn Write> = if policy == NamePolicy::Stdout {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };

    let ifo = Ifo::read_from(File::open(&args.ifo)?)?;
    let (major, minor) = ifo.mat.format_version();
    writeln!(info, "format: DVD-VR V{}.{}", major, minor)?;
    if ifo.mat.cprm_supported != 0 {
        // programs may still be clear; the PES scramble bits decide
        writeln!(info, "encryption: CPRM supported")?;
    }
    let charset = text_encoding_name(ifo.mat.txt_encoding);
    if charset == "Unknown" {
        warn!(
            "unknown text encoding ({:#04x}), assuming ISO_8859-15",
            ifo.mat.txt_encoding
        );
    }
    for line in ifo.disc_info() {
        writeln!(info, "info  : {}", line)?;
    }

    let pgiti = ifo.pgiti()?;
    let formats = ifo.vob_formats(&pgiti)?;
    for (index, format) in formats.iter().enumerate() {
        writeln!(info)?;
        if formats.len() > 1 {
            writeln!(info, "VOB format {}...", index + 1)?;
        }
        print_format(&mut info, format)?;
    }

    let programs = ifo.programs(&pgiti)?;
    writeln!(info, "\nNumber of programs: {}", programs.len())?;
    if let Some(wanted) = args.program {
        if wanted == 0 || wanted as usize > programs.len() {
            return Err(DvdVrError::ProgramOutOfRange(wanted));
        }
    }
    let sets = ifo.program_sets()?;

    let mut vro = match &args.vro {
        Some(path) => Some(File::open(path)?),
        None => None,
    };
    let now = Utc::now();

    for program in &programs {
        if args.program.is_some_and(|wanted| wanted != program.number) {
            continue;
        }
        writeln!(info)?;
        writeln!(info, "num  : {}", program.number)?;
        let set = find_program_set(&sets, program.number);
        match set {
            Some(set) => print_label_lines(&mut info, set)?,
            None => writeln!(info, "label: couldn't find")?,
        }
        match program.timestamp.and_then(|t| t.to_datetime()) {
            Some(when) => writeln!(info, "date : {}", when.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(info, "date : not set")?,
        }
        if formats.len() > 1 {
            writeln!(info, "vob format: {}", program.format_id)?;
        }

        let video = program
            .format_id
            .checked_sub(1)
            .and_then(|i| formats.get(i as usize))
            .map(|f| f.video)
            .unwrap_or_default();
        let mut fixup = ProgramFixup::new(&video);

        if let Some(vro) = vro.as_mut() {
            let stats = match extract_one(vro, program, set, policy, now, &mut fixup) {
                Ok(stats) => stats,
                Err(e) => {
                    // a program that cannot be opened is skipped, the
                    // rest of the disc still extracts
                    error!("program {}: {}", program.number, e);
                    continue;
                }
            };
            writeln!(info, "size : {}", stats.bytes())?;

            match fixup.scramble {
                ScrambleState::Scrambled => warn!("program {} is encrypted", program.number),
                ScrambleState::PartiallyScrambled => {
                    warn!("program {} is partially encrypted", program.number)
                }
                ScrambleState::Unset
                    if stats.sectors > 0
                        && (stats.failed_vobus as usize) < program.vobu_sizes.len() =>
                {
                    warn!("didn't detect a video stream in program {}", program.number)
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn print_format(info: &mut dyn Write, format: &VobFormat) -> io::Result<()> {
    let video = &format.video;
    match video.tv_system {
        Some(tv) => writeln!(info, "tv_system   : {}", tv.name())?,
        None => writeln!(info, "tv_system   : Unknown")?,
    }
    if let (Some(w), Some(h)) = (video.width, video.height) {
        writeln!(info, "resolution  : {}x{}", w, h)?;
    }
    match video.aspect_name() {
        Some(aspect) => writeln!(info, "aspect_ratio: {}", aspect)?,
        None => writeln!(info, "aspect_ratio: Unknown")?,
    }
    match video.compression {
        Some(mode) => writeln!(info, "video_format: {}", mode)?,
        None => writeln!(info, "video_format: Unknown")?,
    }
    let audio = &format.audio0;
    match audio.channels_desc() {
        Some(channels) => writeln!(info, "audio_channs: {}", channels)?,
        None => writeln!(info, "audio_channs: invalid")?,
    }
    match audio.coding_name() {
        Some(coding) => writeln!(info, "audio_coding: {}", coding)?,
        None => writeln!(info, "audio_coding: Unknown ({})", audio.coding)?,
    }
    Ok(())
}

fn extract_one(
    vro: &mut File,
    program: &Program,
    set: Option<&ProgramSet>,
    policy: NamePolicy,
    now: chrono::DateTime<Utc>,
    fixup: &mut ProgramFixup,
) -> Result<panarec::vro::CopyStats> {
    let base = vob_base_name(policy, program, set, now)?;

    if policy == NamePolicy::Stdout {
        let stdout = io::stdout();
        return copy_program(vro, &mut stdout.lock(), program, fixup, |_| {});
    }

    let mut vob_name = format!("{}.vob", base);
    let open_new = |name: &str| OpenOptions::new().write(true).create_new(true).open(name);
    let mut vob = match open_new(&vob_name) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && policy == NamePolicy::Timestamp => {
            // JVC recorders can produce duplicate timestamps
            vob_name = format!("{}#{:03}.vob", base, program.number);
            open_new(&vob_name)?
        }
        Err(e) => return Err(e.into()),
    };

    // separate handles for cache hinting while the primaries stream
    let src_hint = vro.try_clone()?;
    let dst_hint = vob.try_clone()?;
    let vob_start = program.vob_offset as u64 * panarec::ifo::DVD_SECTOR_SIZE as u64;
    let mut hinted = 0u64;
    let stats = copy_program(vro, &mut vob, program, fixup, |copied| {
        sink::drop_cached_pages(&src_hint, vob_start + hinted, copied - hinted);
        sink::drop_cached_pages(&dst_hint, 0, 0);
        hinted = copied;
    })?;
    drop(vob);

    if let Some(mtime) = program.timestamp.and_then(|t| t.to_unix()) {
        if let Err(e) = sink::set_file_times(std::path::Path::new(&vob_name), mtime) {
            warn!("cannot set times on {}: {}", vob_name, e);
        }
    }
    Ok(stats)
}
