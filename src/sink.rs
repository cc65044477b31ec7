use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::DateTime;

/// Create a directory, treating an already existing one as success.
pub fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o775);
    }
    match builder.create(path) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Open an output file, truncating any previous contents.
pub fn create_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Set both access and modification time to `unix_secs`. Works for files
/// and directories; directories must be timestamped after their contents
/// so extraction does not bump them again.
pub fn set_file_times(path: &Path, unix_secs: i64) -> io::Result<()> {
    let time = unix_time(unix_secs);
    let times = FileTimes::new().set_accessed(time).set_modified(time);
    let file = File::options().read(true).open(path)?;
    file.set_times(times)
}

pub fn unix_time(unix_secs: i64) -> SystemTime {
    if unix_secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(unix_secs as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(unix_secs.unsigned_abs())
    }
}

/// One listing line: date, size, path.
pub fn format_list_line(unix_secs: i64, size: u64, path: &Path) -> String {
    let stamp = DateTime::from_timestamp(unix_secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "????-??-?? ??:??:??".to_string());
    format!("{} {:>20} {}", stamp, size, path.display())
}

/// True if `path` already holds a file of the given size and mtime, in
/// which case extraction can skip it entirely.
pub fn already_dumped(path: &Path, unix_secs: i64, size: u64) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() || meta.len() != size {
        return false;
    }
    match meta.modified() {
        Ok(mtime) => mtime == unix_time(unix_secs),
        Err(_) => false,
    }
}

/// Hint the OS to drop cached pages for a byte range of `file`, so that
/// streaming gigabytes of video does not evict everything else. Purely
/// advisory; any failure is logged and ignored.
#[cfg(target_os = "linux")]
pub fn drop_cached_pages(file: &File, offset: u64, len: u64) {
    use std::os::fd::AsRawFd;
    use std::os::raw::c_int;

    const POSIX_FADV_DONTNEED: c_int = 4;
    extern "C" {
        fn posix_fadvise(fd: c_int, offset: i64, len: i64, advice: c_int) -> c_int;
    }

    let ret = unsafe {
        posix_fadvise(
            file.as_raw_fd(),
            offset as i64,
            len as i64,
            POSIX_FADV_DONTNEED,
        )
    };
    if ret != 0 {
        log::warn!(
            "posix_fadvise failed [{}]",
            io::Error::from_raw_os_error(ret)
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn drop_cached_pages(_file: &File, _offset: u64, _len: u64) {
    log::debug!("drop-behind hinting not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("panarec-sink-{}-{}", std::process::id(), name))
    }

    #[test]
    fn list_line_formatting() {
        // 2012-07-04 10:00:00 UTC
        let line = format_list_line(1_341_396_000, 1536 * 1024, Path::new("./TITLE1"));
        assert_eq!(line, "2012-07-04 10:00:00              1572864 ./TITLE1");
    }

    #[test]
    fn create_dir_tolerates_existing() {
        let dir = scratch_path("dir");
        create_dir(&dir).unwrap();
        create_dir(&dir).unwrap();
        fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn dedupe_matches_size_and_mtime() {
        let path = scratch_path("dedupe");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abcd").unwrap();
        drop(f);
        set_file_times(&path, 1_341_396_000).unwrap();

        assert!(already_dumped(&path, 1_341_396_000, 4));
        assert!(!already_dumped(&path, 1_341_396_000, 5));
        assert!(!already_dumped(&path, 1_341_396_001, 4));
        fs::remove_file(&path).unwrap();
        assert!(!already_dumped(&path, 1_341_396_000, 4));
    }
}
