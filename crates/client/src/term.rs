//! Terminal and filesystem abstractions (`spec.md` §4.6 `Terminal`): a
//! thin seam over process stdio so a client's `init` and its CLI
//! commands can be driven by tests without a real TTY.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

/// A writable filesystem view, swappable in tests (`spec.md`'s "FS
/// abstraction for tests").
pub trait Fs: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}

/// Reads and writes the real filesystem.
pub struct NativeFs;

impl Fs for NativeFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        std::fs::write(path, data)
    }
}

/// Stdin/stdout/stderr plus line-oriented read helpers and a pluggable
/// [`Fs`]. `read_password` has no terminal-echo suppression of its own —
/// that needs a crate outside governor's dependency set — so it falls
/// back to an ordinary line read, same as [`Self::read_line`].
#[derive(Clone)]
pub struct Terminal {
    fs: Arc<dyn Fs>,
}

impl Terminal {
    pub fn new(fs: Arc<dyn Fs>) -> Self {
        Self { fs }
    }

    pub fn native() -> Self {
        Self::new(Arc::new(NativeFs))
    }

    pub fn stdout(&self, msg: &str) {
        let mut out = io::stdout();
        let _ = writeln!(out, "{msg}");
    }

    pub fn stderr(&self, msg: &str) {
        let mut err = io::stderr();
        let _ = writeln!(err, "{msg}");
    }

    pub fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }

    pub fn read_password(&self) -> io::Result<String> {
        self.read_line()
    }

    pub fn fs(&self) -> &Arc<dyn Fs> {
        &self.fs
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// An in-memory [`Fs`] for tests.
    #[derive(Default)]
    pub struct MemFs {
        files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    }

    impl MemFs {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Fs for MemFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .lock()
                .expect("mem fs lock poisoned")
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
        }

        fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.files.lock().expect("mem fs lock poisoned").insert(path.to_path_buf(), data.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemFs;
    use super::*;

    #[test]
    fn mem_fs_round_trips_written_data() {
        let fs = MemFs::new();
        fs.write(Path::new("/tmp/widgets.json"), b"hello").unwrap();
        assert_eq!(fs.read(Path::new("/tmp/widgets.json")).unwrap(), b"hello");
    }

    #[test]
    fn mem_fs_missing_file_errors() {
        let fs = MemFs::new();
        assert!(fs.read(Path::new("/tmp/missing.json")).is_err());
    }
}
