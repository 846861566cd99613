//! Directory layout rooted at `data_root` (spec §6).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_root: PathBuf,
    pub inbox: PathBuf,
    pub pending: PathBuf,
    pub merged: PathBuf,
    pub uploaded: PathBuf,
    pub error: PathBuf,
    pub logs: PathBuf,
    pub qr_debug: PathBuf,
}

impl DataPaths {
    pub fn new(data_root: impl Into<PathBuf>, inbox: impl Into<PathBuf>, qr_debug: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            inbox: inbox.into(),
            pending: data_root.join("pending"),
            merged: data_root.join("merged"),
            uploaded: data_root.join("uploaded"),
            error: data_root.join("error"),
            logs: data_root.join("logs"),
            qr_debug: qr_debug.into(),
            data_root,
        }
    }

    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [
            &self.inbox,
            &self.pending,
            &self.merged,
            &self.uploaded,
            &self.error,
            &self.logs,
            &self.qr_debug,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn count_pdfs(dir: &Path) -> usize {
        walk_pdfs(dir).count()
    }
}

/// Non-recursive listing of `*.pdf` in `dir`, silently returning nothing for
/// a missing directory (matches the original's `Path.rglob` "doesn't exist
/// -> 0" behavior, but our tree is flat so a single read_dir suffices).
pub fn walk_pdfs(dir: &Path) -> impl Iterator<Item = PathBuf> {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("pdf")).unwrap_or(false))
}

/// Strip a trailing `(n)` disambiguator, e.g. `20251010123456(2).pdf` -> `20251010123456`.
pub fn identifier_from_stem(stem: &str) -> &str {
    match stem.find('(') {
        Some(idx) if stem.ends_with(')') => &stem[..idx],
        _ => stem,
    }
}

/// Smallest free `n >= 1` such that `<id>(n).pdf` does not exist in `dir`
/// (spec §4.3 pending-naming rule).
pub fn next_free_suffix(dir: &Path, id: &str) -> u32 {
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{id}({n}).pdf"));
        if !candidate.exists() {
            return n;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disambiguator_suffix() {
        assert_eq!(identifier_from_stem("20251010123456(2)"), "20251010123456");
        assert_eq!(identifier_from_stem("20251010123456"), "20251010123456");
    }

    #[test]
    fn finds_smallest_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1(1).pdf"), b"x").unwrap();
        assert_eq!(next_free_suffix(dir.path(), "1"), 2);
    }
}
