//! Chunked transfer coding (RFC 7230 §4.1)
//!
//! The decoder is a byte-driven state machine that can be fed arbitrary
//! slices of input: a read may end anywhere, including in the middle of a
//! chunk-size line or a CRLF pair.
//!
//! ```text
//! chunked-body = *chunk last-chunk trailer-part CRLF
//! chunk        = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
//! last-chunk   = 1*("0") [ chunk-ext ] CRLF
//! ```

use super::headers::is_token_byte;
use super::{Error, Headers, Result, CRLF};
use bytes::BytesMut;
use std::io::Write;

/// Position of the decoder inside a chunked body
///
/// The CR/LF states name the byte the decoder expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Start of a chunk-size line
    Chunked,
    /// Inside the hexadecimal chunk size
    ChunkSize,
    /// Inside a chunk extension name, after `;`
    ChunkExtName,
    /// Inside a chunk extension value, after `=`
    ChunkExtValue,
    /// Optional whitespace before the CR ending a chunk-size line
    ChunkCr1,
    /// LF ending a chunk-size line or a trailer line
    ChunkLf1,
    /// Start of a line after the last chunk: a trailer field or the final CR
    ChunkCr2,
    /// Final LF of the body
    ChunkLf2,
    ChunkTrailerName,
    ChunkTrailerValue,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    /// The final CRLF was consumed
    ChunkedFinish,
}

/// Chunked body decoder
#[derive(Debug, Clone)]
pub struct ChunkDecoder {
    state: ChunkState,
    chunked: bool,
    finished: bool,
    /// Size declared by the current chunk-size line
    chunk_size: usize,
    /// Data octets still expected for the current chunk
    chunk_left: usize,
    /// Decoded octets accumulated so far
    total: usize,
    ext_len: usize,
    ext_quoted: bool,
    ext_escaped: bool,
    trailer_name: String,
    trailer_value: Vec<u8>,
    trailer_bytes: usize,
    max_body: usize,
    max_trailer: usize,
}

impl ChunkDecoder {
    /// Create a decoder bounded by `max_body` decoded octets and
    /// `max_trailer` octets of trailer section
    pub fn new(max_body: usize, max_trailer: usize) -> Self {
        ChunkDecoder {
            state: ChunkState::Chunked,
            chunked: false,
            finished: false,
            chunk_size: 0,
            chunk_left: 0,
            total: 0,
            ext_len: 0,
            ext_quoted: false,
            ext_escaped: false,
            trailer_name: String::new(),
            trailer_value: Vec::new(),
            trailer_bytes: 0,
            max_body,
            max_trailer,
        }
    }

    /// Arm the decoder for a new message declaring chunked coding
    pub fn start(&mut self) {
        self.reset();
        self.chunked = true;
    }

    /// Return to the idle, non-chunked state
    pub fn reset(&mut self) {
        self.state = ChunkState::Chunked;
        self.chunked = false;
        self.finished = false;
        self.chunk_size = 0;
        self.chunk_left = 0;
        self.total = 0;
        self.ext_len = 0;
        self.ext_quoted = false;
        self.ext_escaped = false;
        self.trailer_name.clear();
        self.trailer_value.clear();
        self.trailer_bytes = 0;
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Whether the current message uses chunked coding
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Whether the final CRLF has been consumed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decoded octets so far
    pub fn total(&self) -> usize {
        self.total
    }

    fn invalid(&self, byte: u8) -> Error {
        Error::InvalidChunk(format!("unexpected byte {:#04x} in {:?}", byte, self.state))
    }

    fn push_size_digit(&mut self, digit: u8) -> Result<()> {
        let size = self
            .chunk_size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as usize))
            .ok_or_else(|| Error::InvalidChunk("chunk size overflow".to_string()))?;
        if size > self.max_body.saturating_sub(self.total) {
            return Err(Error::BodyTooLarge(self.max_body));
        }
        self.chunk_size = size;
        Ok(())
    }

    fn end_size_line(&mut self) {
        self.chunk_left = self.chunk_size;
        self.state = ChunkState::ChunkLf1;
    }

    fn count_trailer_byte(&mut self) -> Result<()> {
        self.trailer_bytes += 1;
        if self.trailer_bytes > self.max_trailer {
            return Err(Error::HeaderTooLarge(self.max_trailer));
        }
        Ok(())
    }

    fn finish_trailer_field(&mut self, trailers: &mut Headers) {
        let value = String::from_utf8_lossy(&self.trailer_value);
        let value = value.trim_matches(|c| c == ' ' || c == '\t').to_string();
        trailers.insert(std::mem::take(&mut self.trailer_name), value);
        self.trailer_value.clear();
    }

    /// Consume as much of `input` as possible
    ///
    /// Decoded data is appended to `body` and trailer fields to
    /// `trailers`. Returns the number of input octets consumed; anything
    /// after the final CRLF is left untouched.
    pub fn decode(
        &mut self,
        input: &[u8],
        body: &mut BytesMut,
        trailers: &mut Headers,
    ) -> Result<usize> {
        use ChunkState::*;

        let mut pos = 0;
        while pos < input.len() && self.state != ChunkedFinish {
            if self.state == ChunkData {
                let take = self.chunk_left.min(input.len() - pos);
                body.extend_from_slice(&input[pos..pos + take]);
                pos += take;
                self.chunk_left -= take;
                self.total += take;
                if self.chunk_left == 0 {
                    self.state = ChunkDataCr;
                }
                continue;
            }

            let byte = input[pos];
            pos += 1;

            match self.state {
                Chunked => match hex_digit(byte) {
                    Some(d) => {
                        self.chunk_size = 0;
                        self.push_size_digit(d)?;
                        self.state = ChunkSize;
                    }
                    None => return Err(self.invalid(byte)),
                },
                ChunkSize => match byte {
                    b';' => {
                        self.ext_len = 0;
                        self.state = ChunkExtName;
                    }
                    b' ' | b'\t' => self.state = ChunkCr1,
                    b'\r' => self.end_size_line(),
                    _ => match hex_digit(byte) {
                        Some(d) => self.push_size_digit(d)?,
                        None => return Err(self.invalid(byte)),
                    },
                },
                ChunkExtName => match byte {
                    b' ' | b'\t' if self.ext_len == 0 => {}
                    b if is_token_byte(b) => self.ext_len += 1,
                    b'=' if self.ext_len > 0 => {
                        self.ext_len = 0;
                        self.ext_quoted = false;
                        self.ext_escaped = false;
                        self.state = ChunkExtValue;
                    }
                    b';' if self.ext_len > 0 => self.ext_len = 0,
                    b'\r' if self.ext_len > 0 => self.end_size_line(),
                    _ => return Err(self.invalid(byte)),
                },
                ChunkExtValue => {
                    if self.ext_quoted {
                        match byte {
                            _ if self.ext_escaped => self.ext_escaped = false,
                            b'\\' => self.ext_escaped = true,
                            b'"' => self.ext_quoted = false,
                            b'\t' | b' '..=0x7e | 0x80..=0xff => {}
                            _ => return Err(self.invalid(byte)),
                        }
                        self.ext_len += 1;
                    } else {
                        match byte {
                            b'"' if self.ext_len == 0 => {
                                self.ext_quoted = true;
                                self.ext_len += 1;
                            }
                            b if is_token_byte(b) => self.ext_len += 1,
                            b';' if self.ext_len > 0 => {
                                self.ext_len = 0;
                                self.state = ChunkExtName;
                            }
                            b'\r' if self.ext_len > 0 => self.end_size_line(),
                            _ => return Err(self.invalid(byte)),
                        }
                    }
                }
                ChunkCr1 => match byte {
                    b' ' | b'\t' => {}
                    b';' => {
                        self.ext_len = 0;
                        self.state = ChunkExtName;
                    }
                    b'\r' => self.end_size_line(),
                    _ => return Err(self.invalid(byte)),
                },
                ChunkLf1 => match byte {
                    b'\n' if self.chunk_size > 0 => self.state = ChunkData,
                    b'\n' => self.state = ChunkCr2,
                    _ => return Err(self.invalid(byte)),
                },
                ChunkCr2 => match byte {
                    b'\r' => self.state = ChunkLf2,
                    b if is_token_byte(b) => {
                        self.count_trailer_byte()?;
                        self.trailer_name.clear();
                        self.trailer_name.push(b as char);
                        self.state = ChunkTrailerName;
                    }
                    _ => return Err(self.invalid(byte)),
                },
                ChunkLf2 => match byte {
                    b'\n' => {
                        self.state = ChunkedFinish;
                        self.finished = true;
                    }
                    _ => return Err(self.invalid(byte)),
                },
                ChunkTrailerName => {
                    self.count_trailer_byte()?;
                    match byte {
                        b if is_token_byte(b) => self.trailer_name.push(b as char),
                        b':' => {
                            self.trailer_value.clear();
                            self.state = ChunkTrailerValue;
                        }
                        _ => return Err(self.invalid(byte)),
                    }
                }
                ChunkTrailerValue => {
                    self.count_trailer_byte()?;
                    match byte {
                        b'\r' => {
                            self.finish_trailer_field(trailers);
                            // chunk_size is 0 here, so the LF leads back to
                            // the start of the next trailer-section line
                            self.state = ChunkLf1;
                        }
                        b'\t' | b' '..=0x7e | 0x80..=0xff => self.trailer_value.push(byte),
                        _ => return Err(self.invalid(byte)),
                    }
                }
                ChunkDataCr => match byte {
                    b'\r' => self.state = ChunkDataLf,
                    _ => return Err(self.invalid(byte)),
                },
                ChunkDataLf => match byte {
                    b'\n' => self.state = Chunked,
                    _ => return Err(self.invalid(byte)),
                },
                ChunkData | ChunkedFinish => unreachable!("handled before the byte match"),
            }
        }

        Ok(pos)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        ChunkDecoder::new(usize::MAX, 64 * 1024)
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data; empty input writes nothing, since a
    /// zero-size chunk would end the body
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.write_chunk_ext(data, "")
    }

    /// Write a chunk carrying `ext` (e.g. `name=value`) after the size
    pub fn write_chunk_ext(&mut self, data: &[u8], ext: &str) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if ext.is_empty() {
            write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        } else {
            write!(self.writer, "{:x};{}{}", data.len(), ext, CRLF)?;
        }
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the last chunk and the final CRLF
    pub fn finish(&mut self) -> Result<()> {
        self.finish_with_trailers(&Headers::new())
    }

    /// Write the last chunk, the trailer fields and the final CRLF
    pub fn finish_with_trailers(&mut self, trailers: &Headers) -> Result<()> {
        write!(self.writer, "0{}", CRLF)?;
        for (name, value) in trailers.iter() {
            write!(self.writer, "{}: {}{}", name, value, CRLF)?;
        }
        self.writer.write_all(CRLF.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Decode a complete chunked body, returning data and trailer fields
pub fn decode_chunked_body(input: &[u8]) -> Result<(Vec<u8>, Headers)> {
    let mut decoder = ChunkDecoder::default();
    decoder.start();
    let mut body = BytesMut::new();
    let mut trailers = Headers::new();

    decoder.decode(input, &mut body, &mut trailers)?;
    if !decoder.is_finished() {
        return Err(Error::InvalidChunk("truncated chunked body".to_string()));
    }

    Ok((body.to_vec(), trailers))
}

/// Encode data as a chunked body with fixed-size chunks
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut encoder = ChunkedEncoder::new(Vec::new());

    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;

    Ok(encoder.into_inner())
}
