use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

type FileCallback<'a> = Box<dyn FnMut(&Path, usize) + 'a>;
type DirCallback<'a> = Box<dyn FnMut(&Path, usize) + 'a>;

/// Depth-first directory walker.
///
/// The file callback receives every regular file together with its depth
/// below the root (files directly under the root have depth 0). The optional
/// directory callback is called for each directory before its contents are
/// visited. Entries of a directory are visited in lexicographic order, so two
/// walks over the same tree produce the same sequence.
pub struct FsVisitor<'a> {
    file_callback: FileCallback<'a>,
    dir_callback: Option<DirCallback<'a>>,
}

impl<'a> FsVisitor<'a> {
    pub fn new(file_callback: impl FnMut(&Path, usize) + 'a) -> Self {
        FsVisitor {
            file_callback: Box::new(file_callback),
            dir_callback: None,
        }
    }

    pub fn with_dir_callback(mut self, dir_callback: impl FnMut(&Path, usize) + 'a) -> Self {
        self.dir_callback = Some(Box::new(dir_callback));
        self
    }

    /// Walks `root`. A root that is itself a file is reported once at depth 0.
    pub fn go(&mut self, root: &Path) -> Result<()> {
        if root.is_file() {
            (self.file_callback)(root, 0);
            return Ok(());
        }
        self.visit_dir(root, 0)
    }

    fn visit_dir(&mut self, dir: &Path, depth: usize) -> Result<()> {
        if let Some(cb) = self.dir_callback.as_mut() {
            cb(dir, depth);
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        for path in entries {
            // Follows symlinks, matching what a dataset root usually expects.
            let meta = fs::metadata(&path)?;
            if meta.is_dir() {
                self.visit_dir(&path, depth + 1)?;
            } else if meta.is_file() {
                (self.file_callback)(&path, depth);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_files_in_sorted_order_with_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::write(root.join("z.npy"), b"").unwrap();
        fs::write(root.join("a.txt"), b"").unwrap();
        fs::write(root.join("b/inner/c.npy"), b"").unwrap();

        let mut seen = Vec::new();
        let mut dirs = 0;
        FsVisitor::new(|p: &Path, depth| {
            seen.push((p.strip_prefix(root).unwrap().to_path_buf(), depth))
        })
        .with_dir_callback(|_, _| dirs += 1)
        .go(root)
        .unwrap();

        assert_eq!(
            seen,
            vec![
                (PathBuf::from("a.txt"), 0),
                (PathBuf::from("b/inner/c.npy"), 2),
                (PathBuf::from("z.npy"), 0),
            ]
        );
        assert_eq!(dirs, 3);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut visitor = FsVisitor::new(|_, _| {});
        assert!(visitor.go(&tmp.path().join("nope")).is_err());
    }
}
