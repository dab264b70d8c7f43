//! Splitting a streamed response body into documents

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FramingError;

/// Incremental splitter for a long-lived response body.
///
/// Chunks are pushed as they arrive; complete frames are pulled out one at a
/// time. A frame may span any number of chunks.
pub trait StreamFramer: Send {
    fn push(&mut self, chunk: &[u8]);

    /// Next complete frame, or `None` until more data has been pushed.
    fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError>;

    /// Whether the body signalled its own end
    fn is_finished(&self) -> bool;
}

/// Default limit on one part's body
pub const DEFAULT_MAX_PART_SIZE: usize = 16 * 1024 * 1024;

/// Limit on a part's header block and on a delimiter line
const MAX_HEADER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    /// Looking for the next delimiter line
    Delimiter,
    Headers,
    Body { length: Option<usize> },
}

/// Framer for `multipart/x-mixed-replace` bodies.
///
/// Each part is sized by its `Content-length` header when present and
/// otherwise runs up to the next delimiter. Empty parts are skipped. A part
/// larger than the configured maximum fails the stream as malformed.
#[derive(Debug)]
pub struct MultipartFramer {
    delimiter: Vec<u8>,
    max_part_size: usize,
    buffer: BytesMut,
    state: PartState,
    finished: bool,
}

impl MultipartFramer {
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("--{}", boundary).into_bytes(),
            max_part_size: DEFAULT_MAX_PART_SIZE,
            buffer: BytesMut::new(),
            state: PartState::Delimiter,
            finished: false,
        }
    }

    pub fn with_max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    /// Build a framer from a response `Content-Type`.
    pub fn from_content_type(content_type: &str) -> Result<Self, FramingError> {
        let mut parts = content_type.split(';').map(str::trim);
        let mime = parts.next().unwrap_or_default().to_ascii_lowercase();
        if !mime.starts_with("multipart/") {
            return Err(FramingError::UnsupportedContentType(content_type.to_string()));
        }

        let boundary = parts
            .filter_map(|p| p.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
            .map(|(_, value)| value.trim().trim_matches('"'))
            .filter(|b| !b.is_empty())
            .ok_or_else(|| FramingError::Malformed(format!("No boundary in '{}'", content_type)))?;

        Ok(Self::new(boundary))
    }

    fn next_part(&mut self) -> Result<Option<Bytes>, FramingError> {
        loop {
            match self.state {
                PartState::Delimiter => {
                    let Some(start) = find(&self.buffer, &self.delimiter) else {
                        // Keep a tail in case the delimiter is split across chunks
                        let keep = self.delimiter.len().min(self.buffer.len());
                        let drop = self.buffer.len() - keep;
                        self.buffer.advance(drop);
                        return Ok(None);
                    };

                    let after = start + self.delimiter.len();
                    if self.buffer.len() < after + 2 {
                        return Ok(None);
                    }
                    if &self.buffer[after..after + 2] == b"--" {
                        self.finished = true;
                        self.buffer.clear();
                        return Ok(None);
                    }

                    let Some(line_end) = find(&self.buffer[after..], b"\n") else {
                        if self.buffer.len() - after > MAX_HEADER_SIZE {
                            return Err(FramingError::Malformed("Delimiter line too long".to_string()));
                        }
                        return Ok(None);
                    };
                    self.buffer.advance(after + line_end + 1);
                    self.state = PartState::Headers;
                }
                PartState::Headers => {
                    let (headers_len, skip) = if self.buffer.starts_with(b"\r\n") {
                        (0, 2)
                    } else if self.buffer.starts_with(b"\n") {
                        (0, 1)
                    } else if let Some(end) = find(&self.buffer, b"\r\n\r\n") {
                        (end, 4)
                    } else if let Some(end) = find(&self.buffer, b"\n\n") {
                        (end, 2)
                    } else if self.buffer.len() > MAX_HEADER_SIZE {
                        return Err(FramingError::Malformed(format!(
                            "Part headers exceed {} bytes",
                            MAX_HEADER_SIZE
                        )));
                    } else {
                        return Ok(None);
                    };

                    let headers = String::from_utf8_lossy(&self.buffer[..headers_len]).into_owned();
                    let length = content_length(&headers)?;
                    if let Some(length) = length.filter(|l| *l > self.max_part_size) {
                        return Err(FramingError::Malformed(format!(
                            "Part of {} bytes exceeds the {} byte limit",
                            length, self.max_part_size
                        )));
                    }
                    self.buffer.advance(headers_len + skip);
                    self.state = PartState::Body { length };
                }
                PartState::Body { length: Some(length) } => {
                    if self.buffer.len() < length {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(length).freeze();
                    self.state = PartState::Delimiter;
                    return Ok(Some(body));
                }
                PartState::Body { length: None } => {
                    let mut terminator = b"\r\n".to_vec();
                    terminator.extend_from_slice(&self.delimiter);
                    let Some(end) = find(&self.buffer, &terminator) else {
                        if self.buffer.len() > self.max_part_size + terminator.len() {
                            return Err(FramingError::Malformed(format!(
                                "Unterminated part exceeds the {} byte limit",
                                self.max_part_size
                            )));
                        }
                        return Ok(None);
                    };
                    let body = self.buffer.split_to(end).freeze();
                    self.state = PartState::Delimiter;
                    return Ok(Some(body));
                }
            }
        }
    }
}

impl StreamFramer for MultipartFramer {
    fn push(&mut self, chunk: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(chunk);
        }
    }

    fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError> {
        while let Some(part) = self.next_part()? {
            if !part.iter().all(u8::is_ascii_whitespace) {
                return Ok(Some(part));
            }
        }
        Ok(None)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn content_length(headers: &str) -> Result<Option<usize>, FramingError> {
    for line in headers.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| FramingError::Malformed(format!("Bad Content-length '{}'", value.trim())));
            }
        }
    }
    Ok(None)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
