use crate::errors::{FuzzyError, Result};
use std::io;
use std::time::Duration;

/// Wall clock in unix seconds.
pub fn now_secs() -> u64 {
    let ts = time::OffsetDateTime::now_utc().unix_timestamp();
    u64::try_from(ts).unwrap_or(0)
}

/// Parse `"90"`, `"90s"`, `"15m"`, `"1h"`, `"2d"` (also `ms`) into a duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        return Err(FuzzyError::InvalidInput(format!("bad duration: {s:?}")));
    }
    let n: u64 = num
        .parse()
        .map_err(|_| FuzzyError::InvalidInput(format!("bad duration: {s:?}")))?;
    let d = match unit.trim() {
        "" | "s" => Duration::from_secs(n),
        "ms" => Duration::from_millis(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        "d" => Duration::from_secs(n * 86_400),
        other => {
            return Err(FuzzyError::InvalidInput(format!("unknown duration unit {other:?}")))
        }
    };
    Ok(d)
}

#[cfg(unix)]
pub fn fsync_dir(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
    };
    let f = std::fs::OpenOptions::new().read(true).custom_flags(libc::O_DIRECTORY).open(dir)?;
    f.sync_all()
}
#[cfg(not(unix))]
pub fn fsync_dir(_path: &std::path::Path) -> io::Result<()> { Ok(()) }
