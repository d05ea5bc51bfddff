//! Line-based pipe I/O between the orchestrator and worker processes.
//!
//! Both directions carry one JSON document per line. Reads and writes retry
//! on EINTR so signal delivery never tears a message.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::process::{ChildStdin, ChildStdout};

/// Buffer size for IPC streams. Messages are small; telemetry frames are the
/// largest at a few hundred bytes.
const BUFFER_SIZE: usize = 16 * 1024;

/// A pipe end with EINTR-safe `Read`/`Write`.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Take ownership of a raw descriptor.
    ///
    /// # Safety
    /// `fd` must be open and not owned by anything else.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl From<ChildStdin> for PipeFd {
    fn from(stdin: ChildStdin) -> Self {
        Self::new(OwnedFd::from(stdin))
    }
}

impl From<ChildStdout> for PipeFd {
    fn from(stdout: ChildStdout) -> Self {
        Self::new(OwnedFd::from(stdout))
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered line reader.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line: String::with_capacity(512),
        }
    }

    /// Read one line without its terminator. `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let trimmed = self.line.trim_end_matches(['\n', '\r']).len();
        self.line.truncate(trimmed);
        Ok(Some(&self.line))
    }
}

/// Buffered line writer that flushes every line.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    /// Write a line, appending the newline if missing, and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

/// Create an anonymous pipe as `(read end, write end)`.
#[cfg(test)]
pub fn pipe() -> io::Result<(PipeFd, PipeFd)> {
    let (read_fd, write_fd) =
        nix::unistd::pipe().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    Ok((PipeFd::new(read_fd), PipeFd::new(write_fd)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let (read_fd, write_fd) = pipe().unwrap();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("put").unwrap();
        writer.write_line("get\n").unwrap();
        writer.write_line("").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some("put"));
        assert_eq!(reader.read_line().unwrap(), Some("get"));
        assert_eq!(reader.read_line().unwrap(), Some(""));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let (read_fd, write_fd) = pipe().unwrap();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("status\r\n").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some("status"));
    }

    #[test]
    fn test_write_to_closed_pipe_fails() {
        let (read_fd, write_fd) = pipe().unwrap();
        drop(read_fd);
        let mut writer = LineWriter::new(write_fd);

        // The Rust runtime ignores SIGPIPE, so this surfaces as EPIPE.
        assert!(writer.write_line("orphaned").is_err());
    }
}
