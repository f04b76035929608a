use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};

/// Soft cap on in-memory buffering before a capture leg overflows to disk.
pub const SPILL_THRESHOLD: usize = 512 * 1024;

/// Append-only buffer that holds up to a threshold in memory and spills the
/// whole accumulation to an anonymous temp file beyond it. One owner at a
/// time; the temp file disappears when the buffer (or its reader) is dropped.
pub struct SpillBuffer {
    len: u64,
    threshold: usize,
    mem: Vec<u8>,
    file: Option<File>,
}

impl Default for SpillBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpillBuffer {
    pub fn new() -> SpillBuffer {
        SpillBuffer::with_threshold(SPILL_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> SpillBuffer {
        SpillBuffer {
            len: 0,
            threshold,
            mem: Vec::new(),
            file: None,
        }
    }

    /// Total bytes appended so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.file.is_none() && self.mem.len() + bytes.len() > self.threshold {
            let mut file = tempfile::tempfile()?;
            file.write_all(&self.mem)?;
            self.mem = Vec::new();
            self.file = Some(file);
        }

        match self.file.as_mut() {
            Some(file) => file.write_all(bytes)?,
            None => self.mem.extend_from_slice(bytes),
        }

        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Consumes the buffer into a single-pass reader over everything appended.
    pub fn into_reader(self) -> io::Result<SpillReader> {
        match self.file {
            Some(mut file) => {
                file.rewind()?;
                Ok(SpillReader::File(file))
            }
            None => Ok(SpillReader::Memory(Cursor::new(self.mem))),
        }
    }
}

pub enum SpillReader {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

impl Read for SpillReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SpillReader::Memory(cursor) => cursor.read(buf),
            SpillReader::File(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_back(buf: SpillBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        buf.into_reader().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn stays_in_memory_below_threshold() {
        let mut buf = SpillBuffer::with_threshold(64);
        buf.append(b"hello ").unwrap();
        buf.append(b"world").unwrap();
        assert_eq!(buf.len(), 11);
        assert!(buf.file.is_none());
        assert_eq!(read_back(buf), b"hello world");
    }

    #[test]
    fn spills_past_threshold_and_reads_back_identically() {
        let chunk = vec![0xabu8; 1024];
        let mut buf = SpillBuffer::with_threshold(4096);
        for _ in 0..64 {
            buf.append(&chunk).unwrap();
        }
        assert_eq!(buf.len(), 64 * 1024);
        assert!(buf.file.is_some());

        let out = read_back(buf);
        assert_eq!(out.len(), 64 * 1024);
        assert!(out.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn spill_preserves_byte_order_across_the_boundary() {
        let mut buf = SpillBuffer::with_threshold(8);
        buf.append(b"abcdef").unwrap();
        buf.append(b"ghijkl").unwrap();
        buf.append(b"mno").unwrap();
        assert_eq!(read_back(buf), b"abcdefghijklmno");
    }
}
