pub mod file;

pub use file::OutputFile;

/// Destination for decoded serial lines.
pub trait LineSink {
    /// Writes `line` as-is. The data must reach the sink before this returns.
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
    fn close(self) -> std::io::Result<()>
    where
        Self: Sized;
}
