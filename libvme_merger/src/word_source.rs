use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{ErrorKind, Read};

use super::config::WordByteOrder;
use super::error::WordSourceError;

/// Anything that can hand the unpacker 32-bit words one at a time.
///
/// `Ok(None)` signals a clean end of the source. Blocking, reconnection and timeouts are the
/// business of the implementor; the unpacker never retries.
pub trait WordSource {
    fn next_word(&mut self) -> Result<Option<u32>, WordSourceError>;
}

impl<S: WordSource + ?Sized> WordSource for &mut S {
    fn next_word(&mut self) -> Result<Option<u32>, WordSourceError> {
        (**self).next_word()
    }
}

/// WordReader reads words from any byte stream (file, socket, pipe) in a fixed byte order.
#[derive(Debug)]
pub struct WordReader<R: Read> {
    reader: R,
    byte_order: WordByteOrder,
    words_read: u64,
}

impl<R: Read> WordReader<R> {
    pub fn new(reader: R, byte_order: WordByteOrder) -> Self {
        Self {
            reader,
            byte_order,
            words_read: 0,
        }
    }

    pub fn words_read(&self) -> u64 {
        self.words_read
    }
}

impl<R: Read> WordSource for WordReader<R> {
    fn next_word(&mut self) -> Result<Option<u32>, WordSourceError> {
        let result = match self.byte_order {
            WordByteOrder::Little => self.reader.read_u32::<LittleEndian>(),
            WordByteOrder::Big => self.reader.read_u32::<BigEndian>(),
        };
        match result {
            Ok(word) => {
                self.words_read += 1;
                Ok(Some(word))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                // A partial word at the tail also lands here; std gives us no byte count.
                spdlog::debug!("WordReader reached end of source after {} words", self.words_read);
                Ok(None)
            }
            Err(e) => Err(WordSourceError::IOError(e)),
        }
    }
}

/// An in-memory source of words, for replaying buffers that are already decoded to words.
#[derive(Debug, Clone, Default)]
pub struct WordBuffer {
    words: Vec<u32>,
    position: usize,
}

impl WordBuffer {
    pub fn new(words: Vec<u32>) -> Self {
        Self { words, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.position
    }
}

impl From<Vec<u32>> for WordBuffer {
    fn from(words: Vec<u32>) -> Self {
        Self::new(words)
    }
}

impl WordSource for WordBuffer {
    fn next_word(&mut self) -> Result<Option<u32>, WordSourceError> {
        let word = self.words.get(self.position).copied();
        if word.is_some() {
            self.position += 1;
        }
        Ok(word)
    }
}

/// Wraps a source with room to push back one word.
///
/// Used to resynchronize: a control word found where it does not belong can be handed back
/// so that the next read sees it again.
#[derive(Debug)]
pub struct PeekableSource<S: WordSource> {
    source: S,
    pending: Option<u32>,
    words_read: u64,
}

impl<S: WordSource> PeekableSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: None,
            words_read: 0,
        }
    }

    /// Hand a word back. Only one word can be pending; a second push replaces the first.
    pub fn push_back(&mut self, word: u32) {
        if let Some(dropped) = self.pending.replace(word) {
            spdlog::warn!("PeekableSource dropped pending word {dropped:#010x}");
        }
    }

    /// Number of words pulled from the underlying source (push backs are not counted twice)
    pub fn words_read(&self) -> u64 {
        self.words_read
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: WordSource> WordSource for PeekableSource<S> {
    fn next_word(&mut self) -> Result<Option<u32>, WordSourceError> {
        if let Some(word) = self.pending.take() {
            return Ok(Some(word));
        }
        let word = self.source.next_word()?;
        if word.is_some() {
            self.words_read += 1;
        }
        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_word_reader_little_endian() {
        let bytes: Vec<u8> = vec![0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = WordReader::new(Cursor::new(bytes), WordByteOrder::Little);
        assert_eq!(reader.next_word().unwrap(), Some(0x1234_5678));
        assert_eq!(reader.next_word().unwrap(), Some(0xFFFF_FFFF));
        assert_eq!(reader.next_word().unwrap(), None);
        assert_eq!(reader.words_read(), 2);
    }

    #[test]
    fn test_word_reader_big_endian() {
        let bytes: Vec<u8> = vec![0x12, 0x34, 0x56, 0x78];
        let mut reader = WordReader::new(Cursor::new(bytes), WordByteOrder::Big);
        assert_eq!(reader.next_word().unwrap(), Some(0x1234_5678));
        assert_eq!(reader.next_word().unwrap(), None);
    }

    #[test]
    fn test_word_reader_truncated_tail() {
        let bytes: Vec<u8> = vec![0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        let mut reader = WordReader::new(Cursor::new(bytes), WordByteOrder::Little);
        assert_eq!(reader.next_word().unwrap(), Some(1));
        assert_eq!(reader.next_word().unwrap(), None);
    }

    #[test]
    fn test_word_buffer() {
        let mut buffer = WordBuffer::from(vec![1, 2]);
        assert_eq!(buffer.remaining(), 2);
        assert_eq!(buffer.next_word().unwrap(), Some(1));
        assert_eq!(buffer.next_word().unwrap(), Some(2));
        assert_eq!(buffer.next_word().unwrap(), None);
        assert_eq!(buffer.next_word().unwrap(), None);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_peekable_push_back() {
        let mut source = PeekableSource::new(WordBuffer::new(vec![10, 20]));
        assert_eq!(source.next_word().unwrap(), Some(10));
        source.push_back(10);
        assert_eq!(source.next_word().unwrap(), Some(10));
        assert_eq!(source.next_word().unwrap(), Some(20));
        assert_eq!(source.next_word().unwrap(), None);
        assert_eq!(source.words_read(), 2);
    }
}
