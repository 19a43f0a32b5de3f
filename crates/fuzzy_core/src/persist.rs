//! Record file load and periodic sync.
//!
//! The file is a flat run of 80-byte records (see `digest`). Sync writes a
//! sibling temp file and renames it over the target, so readers only ever see
//! a complete previous or complete new file.

use crate::config::Config;
use crate::consts::{MOD_LIMIT, RECORD_SIZE};
use crate::digest::StoredRecord;
use crate::errors::Result;
use crate::index::FuzzyStore;
use crate::similarity::Similarity;
use crate::utils::fsync_dir;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Bytes of an incomplete trailing record that were ignored.
    pub trailing_garbage: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub written: usize,
    pub expired: usize,
    pub write_errors: usize,
}

/// Fill `buf` as far as the reader allows; returns the byte count read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Stream records out of `r`, stopping at the first short read.
pub fn read_records<R, F>(r: R, mut each: F) -> io::Result<LoadReport>
where
    R: Read,
    F: FnMut(StoredRecord),
{
    let mut rdr = BufReader::new(r);
    let mut buf = [0u8; RECORD_SIZE];
    let mut report = LoadReport::default();
    loop {
        let n = read_full(&mut rdr, &mut buf)?;
        if n < RECORD_SIZE {
            report.trailing_garbage = n;
            return Ok(report);
        }
        each(StoredRecord::decode(&buf));
        report.loaded += 1;
    }
}

/// Persistence engine: owns the sync trigger state, not the records.
#[derive(Debug, Clone)]
pub struct Persistence {
    path: Option<PathBuf>,
    expire: u64,
    mod_limit: u32,
    force: bool,
}

impl Persistence {
    pub fn new(path: Option<PathBuf>, expire: u64) -> Self {
        Self { path, expire, mod_limit: MOD_LIMIT, force: false }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            path: cfg.hashfile.clone(),
            expire: cfg.expire.as_secs(),
            mod_limit: cfg.mod_limit,
            force: false,
        }
    }

    pub fn with_mod_limit(mut self, limit: u32) -> Self {
        self.mod_limit = limit;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn expire(&self) -> u64 {
        self.expire
    }

    /// Make the next `maybe_sync` run regardless of the modification count.
    pub fn request_flush(&mut self) {
        self.force = true;
    }

    pub fn is_due<S: Similarity>(&self, store: &FuzzyStore<S>) -> bool {
        self.force || store.pending_mods() >= self.mod_limit
    }

    /// Populate `store` from the record file. A missing or unreadable file
    /// leaves the store empty and is not an error.
    pub fn load<S: Similarity>(&self, store: &mut FuzzyStore<S>) -> LoadReport {
        let Some(path) = self.path.as_deref() else {
            return LoadReport::default();
        };
        let f = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                error!(path = %path.display(), "cannot open hash file, it can be created after save procedure: {e}");
                return LoadReport::default();
            }
        };
        let mut loaded = 0usize;
        let res = read_records(f, |rec| {
            store.insert_loaded(rec);
            loaded += 1;
        });
        match res {
            Ok(report) => {
                if report.trailing_garbage > 0 {
                    warn!(
                        path = %path.display(),
                        bytes = report.trailing_garbage,
                        "ignoring garbage at the end of hash file"
                    );
                }
                info!(path = %path.display(), records = report.loaded, "loaded fuzzy hashes");
                report
            }
            Err(e) => {
                error!(path = %path.display(), loaded, "cannot read hash file: {e}");
                LoadReport { loaded, trailing_garbage: 0 }
            }
        }
    }

    /// Sync if due. `Ok(None)` means nothing was due (or no file configured).
    pub fn maybe_sync<S: Similarity>(
        &mut self,
        store: &mut FuzzyStore<S>,
        now: u64,
    ) -> Result<Option<SyncReport>> {
        if !self.is_due(store) {
            return Ok(None);
        }
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };
        info!(path = %path.display(), "syncing fuzzy hash storage");
        let report = sync_to(&path, store, now, self.expire)?;
        store.reset_mods();
        self.force = false;
        Ok(Some(report))
    }
}

/// Sweep `store` and rewrite `path` with every surviving record.
///
/// Failing to create the temp file or to publish it aborts the cycle; the
/// expired records are still gone from memory in the latter case.
pub fn sync_to<S: Similarity>(
    path: &Path,
    store: &mut FuzzyStore<S>,
    now: u64,
    expire: u64,
) -> Result<SyncReport> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".fuzzy_sync_")
        .tempfile_in(dir)
        .map_err(|e| {
            error!(path = %path.display(), "cannot create hash file: {e}");
            e
        })?;

    let mut report = SyncReport::default();
    {
        let mut w = BufWriter::new(tmp.as_file());
        let (mut written, mut write_errors) = (0usize, 0usize);
        report.expired = store.sweep(now, expire, |rec| match w.write_all(&rec.encode()) {
            Ok(()) => written += 1,
            Err(e) => {
                write_errors += 1;
                error!(path = %path.display(), "cannot write hash file: {e}");
            }
        });
        report.written = written;
        report.write_errors = write_errors;
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        error!(path = %path.display(), "cannot publish hash file: {}", e.error);
        e
    })?;
    if let Err(e) = fsync_dir(path) {
        warn!(path = %path.display(), "directory fsync failed: {e}");
    }
    info!(
        written = report.written,
        expired = report.expired,
        errors = report.write_errors,
        "fuzzy hash storage synced"
    );
    Ok(report)
}
