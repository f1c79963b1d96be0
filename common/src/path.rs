//! Session directory naming.
//!
//! Every session writes into `<root>/Bag_YYYY_MM_DD_HH_MM_SS`, rendered in
//! UTC so that names compare the same across deployments.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

/// Prefix of every session directory.
pub const BAG_PREFIX: &str = "Bag_";

/// `strftime` pattern of the timestamp part.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Directory name for a session started at `now` (converted to UTC).
pub fn dir_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!(
        "{BAG_PREFIX}{}",
        now.with_timezone(&Utc).format(TIMESTAMP_FORMAT)
    )
}

/// Full session path under `root`.  Pure: touches no filesystem.
pub fn compute_path<Tz: TimeZone>(root: &Path, now: &DateTime<Tz>) -> PathBuf {
    root.join(dir_name(now))
}

/// Stateful wrapper around [`compute_path`] that never hands out the same
/// path twice in a row.
///
/// When two sessions start within the same UTC second the later ones get a
/// `_1`, `_2`, ... suffix.
#[derive(Debug, Default)]
pub struct PathNamer {
    last: Option<(PathBuf, i64)>,
    seq: u32,
}

impl PathNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, root: &Path, now: &DateTime<Utc>) -> PathBuf {
        let second = now.timestamp();
        let same_second = matches!(&self.last, Some((r, s)) if r == root && *s == second);

        if same_second {
            self.seq += 1;
            root.join(format!("{}_{}", dir_name(now), self.seq))
        } else {
            self.last = Some((root.to_path_buf(), second));
            self.seq = 0;
            compute_path(root, now)
        }
    }
}
