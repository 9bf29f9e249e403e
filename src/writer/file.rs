use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::LineSink;

pub struct OutputFile {
    path: PathBuf,
    file: File,
}

impl OutputFile {
    /// Opens `path` for reading and writing, truncating anything already there.
    pub fn create(path: &Path) -> Result<OutputFile, std::io::Error> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        log::info!("Created file: {}", path.display());

        Ok(OutputFile {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSink for OutputFile {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }

    fn close(mut self) -> std::io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        log::debug!("Closed file: {}", self.path.display());
        Ok(())
    }
}
