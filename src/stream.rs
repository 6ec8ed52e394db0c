use crate::config::{CONTENT_TYPE_SSE, CONTENT_TYPE_TEXT};

/// Wire framing of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Server-sent events: one `field: value` per line.
    LineEvent,
    /// Concatenated (or newline-delimited) JSON objects.
    JsonObject,
    /// Plain text, one fragment per line.
    PlainText,
    /// Sniff the buffer on every split.
    Auto,
}

impl FrameFormat {
    /// 根据 Content-Type 推断分帧方式
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::stream::FrameFormat;
    ///
    /// assert_eq!(FrameFormat::from_content_type(Some("text/event-stream; charset=utf-8")), FrameFormat::LineEvent);
    /// assert_eq!(FrameFormat::from_content_type(Some("application/x-ndjson")), FrameFormat::JsonObject);
    /// assert_eq!(FrameFormat::from_content_type(None), FrameFormat::Auto);
    /// ```
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return FrameFormat::Auto;
        };
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains(CONTENT_TYPE_SSE) {
            FrameFormat::LineEvent
        } else if content_type.contains("json") {
            FrameFormat::JsonObject
        } else if content_type.contains(CONTENT_TYPE_TEXT) {
            FrameFormat::PlainText
        } else {
            FrameFormat::Auto
        }
    }

    /// Resolves `Auto` against the buffer contents; concrete formats are returned as-is.
    pub fn resolve(self, buffer: &str) -> FrameFormat {
        match self {
            FrameFormat::Auto if buffer.contains("data:") => FrameFormat::LineEvent,
            FrameFormat::Auto if buffer.contains('{') && buffer.contains('}') => {
                FrameFormat::JsonObject
            }
            FrameFormat::Auto => FrameFormat::PlainText,
            concrete => concrete,
        }
    }
}

/// Result of [`split_frames`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitFrames {
    /// Complete frames in arrival order.
    pub frames: Vec<String>,
    /// Trailing bytes that do not yet form a frame; prepend to the next read.
    pub remainder: String,
}

/// Splits an accumulated text buffer into complete frames plus an unconsumed remainder.
///
/// Feeding any partition of a body chunk by chunk, carrying `remainder` forward, yields the
/// same frames as feeding the whole body at once.
///
/// # Examples
///
/// ```
/// use unillm::stream::{split_frames, FrameFormat};
///
/// let split = split_frames(r#"{"a":1}{"b":{"c":2}}{"d""#, FrameFormat::JsonObject);
/// assert_eq!(split.frames, vec![r#"{"a":1}"#, r#"{"b":{"c":2}}"#]);
/// assert_eq!(split.remainder, r#"{"d""#);
/// ```
pub fn split_frames(buffer: &str, format: FrameFormat) -> SplitFrames {
    match format.resolve(buffer) {
        FrameFormat::JsonObject => split_json_objects(buffer),
        _ => split_lines(buffer),
    }
}

fn split_lines(buffer: &str) -> SplitFrames {
    let Some(last_newline) = buffer.rfind('\n') else {
        return SplitFrames {
            frames: Vec::new(),
            remainder: buffer.to_string(),
        };
    };

    let frames = buffer[..last_newline]
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    SplitFrames {
        frames,
        remainder: buffer[last_newline + 1..].to_string(),
    }
}

fn split_json_objects(buffer: &str) -> SplitFrames {
    let mut frames = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut consumed = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // Braces are ASCII, so byte offsets are always char boundaries.
    for (idx, byte) in buffer.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    frames.push(buffer[start..=idx].to_string());
                    consumed = idx + 1;
                }
            }
            _ => {}
        }
    }

    let remainder = if frames.is_empty() {
        buffer.to_string()
    } else {
        buffer[consumed..].to_string()
    };

    SplitFrames { frames, remainder }
}

/// Incremental UTF-8 decoder for chunked bodies.
///
/// A multi-byte code point split across two reads is held back until the rest arrives;
/// invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `pending + bytes` as possible.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let cut = incomplete_tail_start(&self.pending);
        let tail = self.pending.split_off(cut);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Flushes whatever is still held back, lossily.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Index where a trailing, still-incomplete UTF-8 sequence begins (or `bytes.len()`).
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return len,
        };
        return if needed > back { len - back } else { len };
    }
    len
}
