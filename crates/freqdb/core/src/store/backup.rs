// FreqDB
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Backup rotation for table files

use crate::error::FreqResult;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// Append a raw suffix to a path (`counts.db` + `.cDB` -> `counts.db.cDB`)
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// First `<path>.bak<N>` that does not exist yet, counting from 0
pub fn next_backup_path(path: &Path) -> PathBuf {
    let mut idx = 0u32;
    loop {
        let candidate = append_suffix(path, &format!(".bak{idx}"));
        if !candidate.exists() {
            return candidate;
        }
        idx += 1;
    }
}

/// Move an existing file out of the way. Backups are never overwritten.
///
/// Returns the backup location, or `None` when there was nothing to move.
pub fn backup_existing(path: &Path) -> FreqResult<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let target = next_backup_path(path);
    info!("Moving {} to {}", path.display(), target.display());
    std::fs::rename(path, &target)?;
    Ok(Some(target))
}
