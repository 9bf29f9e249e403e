//! The read-decode-append loop.
//!
//! An [`Acquisition`] owns one [`LineSource`] and one [`LineSink`] and moves
//! lines from the first to the second until something fails. It has two
//! states: [`State::Reading`] and the final [`State::Terminated`].

use std::string::FromUtf8Error;

use thiserror::Error;

use crate::serial::data::InvalidUtf8;
use crate::serial::{LineSource, ReadError};
use crate::writer::LineSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Reading,
    Terminated,
}

/// Why the loop ended.
#[derive(Debug, Error)]
pub enum Termination {
    #[error("serial device disconnected")]
    Disconnected,
    #[error("shutdown requested")]
    Cancelled,
    #[error("serial read failed: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("received a line that is not valid UTF-8: {0}")]
    DecodeFailed(#[source] FromUtf8Error),
    #[error("writing to the output failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

impl From<ReadError> for Termination {
    fn from(e: ReadError) -> Termination {
        match e {
            ReadError::Disconnected => Termination::Disconnected,
            ReadError::Cancelled => Termination::Cancelled,
            ReadError::Io(e) => Termination::ReadFailed(e),
            ReadError::Decode(e) => Termination::DecodeFailed(e),
        }
    }
}

#[derive(Debug)]
pub struct Report {
    pub lines_written: usize,
    pub bytes_written: u64,
    pub lines_skipped: usize,
    pub termination: Termination,
}

pub struct Acquisition<S, W> {
    source: S,
    sink: W,
    invalid_utf8: InvalidUtf8,
    state: State,
    termination: Option<Termination>,
    lines_written: usize,
    bytes_written: u64,
    lines_skipped: usize,
}

impl<S: LineSource, W: LineSink> Acquisition<S, W> {
    pub fn new(source: S, sink: W, invalid_utf8: InvalidUtf8) -> Acquisition<S, W> {
        Acquisition {
            source,
            sink,
            invalid_utf8,
            state: State::Reading,
            termination: None,
            lines_written: 0,
            bytes_written: 0,
            lines_skipped: 0,
        }
    }

    /// Moves one line from the source to the sink.
    pub fn step(&mut self) -> State {
        if self.state == State::Terminated {
            return self.state;
        }

        let line = match self.source.next_line() {
            Ok(line) => line,
            Err(ReadError::Decode(e)) if self.invalid_utf8 == InvalidUtf8::Skip => {
                log::warn!("Skipping line with invalid UTF-8 ({} bytes)", e.as_bytes().len());
                self.lines_skipped += 1;
                return self.state;
            }
            Err(e) => return self.terminate(e.into()),
        };

        if let Err(e) = self.sink.write_line(&line) {
            return self.terminate(Termination::WriteFailed(e));
        }

        self.lines_written += 1;
        self.bytes_written += line.len() as u64;
        log::trace!("Wrote line {}: {:?}", self.lines_written, line);

        self.state
    }

    fn terminate(&mut self, termination: Termination) -> State {
        self.termination = Some(termination);
        self.state = State::Terminated;
        self.state
    }

    /// Runs until the first failure, then releases the sink and the source.
    pub fn run(mut self) -> Report {
        while self.step() == State::Reading {}

        let Acquisition {
            source,
            sink,
            termination,
            lines_written,
            bytes_written,
            lines_skipped,
            ..
        } = self;

        // Reverse of the opening order: output first, then the port
        if let Err(e) = sink.close() {
            log::error!("Unable to close output: {}", e);
        }
        drop(source);

        Report {
            lines_written,
            bytes_written,
            lines_skipped,
            termination: termination.unwrap_or(Termination::Disconnected),
        }
    }
}
