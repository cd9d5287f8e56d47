//! TLS master secret log (SSLKEYLOG format sink).
//!
//! Each `secret` frame's payload is written verbatim followed by a single
//! newline, with no parsing of the record. The file is recreated at
//! receiver construction time, opened lazily on the first secret and closed
//! when the receive loop exits.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only sink for TLS master secrets.
pub struct Keylog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Keylog {
    /// Create a keylog bound to `path`, deleting any previous file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        Self { path, writer: None }
    }

    /// Path of the keylog file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one secret followed by a newline byte.
    ///
    /// Opens (and truncates) the file on first use.
    pub fn write_secret(&mut self, secret: &[u8]) -> io::Result<()> {
        if self.writer.is_none() {
            self.writer = Some(BufWriter::new(File::create(&self.path)?));
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(secret)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flush and close the file, if it was ever opened.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for Keylog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
