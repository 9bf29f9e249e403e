pub mod data;

use std::io::{self, BufRead, BufReader};
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;

use data::InvalidUtf8;

#[derive(Debug, Clone)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Read timeout of the port. Only used to check for shutdown between waits.
    pub poll_interval: Duration,
}

/// Fatal startup failure, reported before any data is read.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Serial device {0} not found")]
    NotFound(String, #[source] serialport::Error),
    #[error("Permission denied opening serial device {0}")]
    PermissionDenied(String, #[source] serialport::Error),
    #[error("Unable to open serial device {0}: {1}")]
    Other(String, #[source] serialport::Error),
}

impl OpenError {
    fn from_serialport(path: &str, e: serialport::Error) -> OpenError {
        match e.kind() {
            serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
                OpenError::NotFound(path.to_string(), e)
            }
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                OpenError::PermissionDenied(path.to_string(), e)
            }
            _ => OpenError::Other(path.to_string(), e),
        }
    }
}

/// Outcome of a failed `LineSource::next_line`.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("device disconnected")]
    Disconnected,
    #[error("read cancelled by shutdown request")]
    Cancelled,
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("line is not valid UTF-8: {0}")]
    Decode(#[from] FromUtf8Error),
}

pub trait LineSource {
    /// Blocks until one full line is available and returns it with its terminator.
    fn next_line(&mut self) -> Result<String, ReadError>;
}

/// Reads newline-terminated lines from any buffered byte stream.
pub struct LineReader<R> {
    inner: R,
    invalid_utf8: InvalidUtf8,
    shutdown: Option<Arc<AtomicBool>>,
    pending: Vec<u8>,
    eof: bool,
}

pub type SerialLineReader = LineReader<BufReader<Box<dyn SerialPort>>>;

/// Opens the device described by `settings` at 8N1 without flow control.
pub fn open(
    settings: &PortSettings,
    invalid_utf8: InvalidUtf8,
    shutdown: Arc<AtomicBool>,
) -> Result<SerialLineReader, OpenError> {
    log::debug!(
        "Opening serial port: {} at baud rate: {}",
        settings.path,
        settings.baud_rate
    );

    let port = serialport::new(settings.path.as_str(), settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.poll_interval)
        .open()
        .map_err(|e| OpenError::from_serialport(&settings.path, e))?;

    Ok(LineReader::new(BufReader::new(port), invalid_utf8).with_shutdown(shutdown))
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, invalid_utf8: InvalidUtf8) -> LineReader<R> {
        LineReader {
            inner,
            invalid_utf8,
            shutdown: None,
            pending: Vec::new(),
            eof: false,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> LineReader<R> {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    fn take_line(&mut self) -> Result<String, ReadError> {
        let bytes = std::mem::take(&mut self.pending);
        Ok(data::decode(bytes, self.invalid_utf8)?)
    }
}

impl<R: BufRead> LineSource for LineReader<R> {
    fn next_line(&mut self) -> Result<String, ReadError> {
        if self.eof {
            return Err(ReadError::Disconnected);
        }
        if self.shutdown_requested() {
            return Err(ReadError::Cancelled);
        }

        loop {
            // Bytes read before an error stay in `pending`, so a timeout never splits a line
            match self.inner.read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    self.eof = true;
                    if self.pending.is_empty() {
                        return Err(ReadError::Disconnected);
                    }
                    log::debug!("Stream ended mid-line, keeping {} bytes", self.pending.len());
                    return self.take_line();
                }
                Ok(_) => {
                    if self.pending.last() == Some(&b'\n') {
                        return self.take_line();
                    }
                    // Unterminated tail, delivered on the next pass once EOF is confirmed
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if self.shutdown_requested() {
                        return Err(ReadError::Cancelled);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe
                            | io::ErrorKind::NotConnected
                            | io::ErrorKind::UnexpectedEof
                    ) =>
                {
                    log::debug!("Serial read reported disconnect: {}", e);
                    self.eof = true;
                    return Err(ReadError::Disconnected);
                }
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Cursor, Read};

    /// Replays scripted reads, then reports end of stream.
    struct ScriptedPort {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> BufReader<ScriptedPort> {
            BufReader::new(ScriptedPort { steps: steps.into() })
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(bytes)) => {
                    assert!(bytes.len() <= buf.len());
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    fn timed_out() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
    }

    #[test]
    fn yields_lines_with_terminators_then_disconnects() {
        let mut reader = LineReader::new(Cursor::new(b"A\nBC\r\n\n".to_vec()), InvalidUtf8::Stop);

        assert_eq!(reader.next_line().unwrap(), "A\n");
        assert_eq!(reader.next_line().unwrap(), "BC\r\n");
        assert_eq!(reader.next_line().unwrap(), "\n");
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
    }

    #[test]
    fn empty_stream_disconnects_immediately() {
        let mut reader = LineReader::new(Cursor::new(Vec::new()), InvalidUtf8::Stop);
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
    }

    #[test]
    fn unterminated_tail_is_delivered_before_disconnect() {
        let mut reader = LineReader::new(Cursor::new(b"one\ntw".to_vec()), InvalidUtf8::Stop);

        assert_eq!(reader.next_line().unwrap(), "one\n");
        assert_eq!(reader.next_line().unwrap(), "tw");
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
    }

    #[test]
    fn timeouts_do_not_split_a_line() {
        let port = ScriptedPort::new(vec![
            Ok(b"-71,".to_vec()),
            timed_out(),
            timed_out(),
            Ok(b"9,\r\n".to_vec()),
        ]);
        let mut reader = LineReader::new(port, InvalidUtf8::Stop);

        assert_eq!(reader.next_line().unwrap(), "-71,9,\r\n");
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
    }

    #[test]
    fn shutdown_flag_cancels_at_next_timeout() {
        /// Signal arrives while the read is blocked.
        struct SignalledPort {
            shutdown: Arc<AtomicBool>,
        }

        impl Read for SignalledPort {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                self.shutdown.store(true, Ordering::Relaxed);
                timed_out().map(|_| 0)
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let port = BufReader::new(SignalledPort { shutdown: Arc::clone(&shutdown) });
        let mut reader = LineReader::new(port, InvalidUtf8::Stop).with_shutdown(shutdown);

        assert!(matches!(reader.next_line(), Err(ReadError::Cancelled)));
    }

    #[test]
    fn shutdown_flag_cancels_while_data_keeps_arriving() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut reader = LineReader::new(Cursor::new(b"-61,8,\r\n".repeat(5)), InvalidUtf8::Stop)
            .with_shutdown(Arc::clone(&shutdown));

        assert_eq!(reader.next_line().unwrap(), "-61,8,\r\n");
        shutdown.store(true, Ordering::Relaxed);
        assert!(matches!(reader.next_line(), Err(ReadError::Cancelled)));
    }

    #[test]
    fn broken_pipe_is_a_disconnect() {
        let port = ScriptedPort::new(vec![
            Ok(b"first\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")),
            Ok(b"never\n".to_vec()),
        ]);
        let mut reader = LineReader::new(port, InvalidUtf8::Stop);

        assert_eq!(reader.next_line().unwrap(), "first\n");
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
        assert!(matches!(reader.next_line(), Err(ReadError::Disconnected)));
    }

    #[test]
    fn other_io_errors_are_reported() {
        let port = ScriptedPort::new(vec![Err(io::Error::new(io::ErrorKind::Other, "framing error"))]);
        let mut reader = LineReader::new(port, InvalidUtf8::Stop);

        match reader.next_line() {
            Err(ReadError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::Other),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut reader = LineReader::new(Cursor::new(vec![0xc3, 0x28, b'\n', b'o', b'k', b'\n']), InvalidUtf8::Skip);

        assert!(matches!(reader.next_line(), Err(ReadError::Decode(_))));
        assert_eq!(reader.next_line().unwrap(), "ok\n");
    }

    #[test]
    fn open_missing_device_is_a_startup_error() {
        let settings = PortSettings {
            path: "/dev/serial-line-logger-missing".to_string(),
            baud_rate: 115_200,
            poll_interval: Duration::from_millis(10),
        };

        match open(&settings, InvalidUtf8::Stop, Arc::new(AtomicBool::new(false))) {
            Err(OpenError::NotFound(path, _)) => assert_eq!(path, settings.path),
            Err(e) => panic!("unexpected open error: {}", e),
            Ok(_) => panic!("opened a device that does not exist"),
        }
    }
}
