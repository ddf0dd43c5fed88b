use std::fmt::Write as _;

use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

// ── StompCommand ─────────────────────────────────────────────────────

/// Frame command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum StompCommand {
    // client → broker
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // broker → client
    Connected,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    /// `CONNECT` and `CONNECTED` headers are sent without escaping.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// A single STOMP frame with a UTF-8 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL-terminated.
    ///
    /// A `content-length` header is added for non-empty bodies unless the
    /// caller supplied one.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_ref());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                escape_into(name, &mut out);
                out.push(':');
                escape_into(value, &mut out);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(Error::Protocol(format!("invalid header escape \\{other}")));
            }
            None => return Err(Error::Protocol("dangling backslash in header".into())),
        }
    }
    Ok(out)
}

// ── Decoder ──────────────────────────────────────────────────────────

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One or more bare EOLs (a heart-beat).
    Heartbeat,
    Frame(Frame),
}

/// Largest partial frame held while waiting for its terminator.
pub const MAX_BUFFERED: usize = 1024 * 1024;

/// Incremental frame decoder.
///
/// Transport messages may carry several frames, a frame split across
/// messages, or heart-beat EOLs between frames. Partial input is buffered
/// until the terminating NUL arrives, up to [`MAX_BUFFERED`] bytes.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: String,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_BUFFERED)
    }
}

impl FrameDecoder {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &str) -> Result<Vec<Incoming>, Error> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let eols = leading_eols(&self.buf);
            if eols > 0 {
                self.buf.drain(..eols);
                out.push(Incoming::Heartbeat);
            }
            if self.buf.is_empty() {
                break;
            }
            match parse_frame(&self.buf)? {
                Some((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    out.push(Incoming::Frame(frame));
                }
                None => break,
            }
        }

        if self.buf.len() > self.limit {
            let held = self.buf.len();
            self.buf.clear();
            return Err(Error::Protocol(format!(
                "partial frame of {held} bytes exceeds the {} byte limit",
                self.limit
            )));
        }

        Ok(out)
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn leading_eols(buf: &str) -> usize {
    let bytes = buf.as_bytes();
    let mut pos = 0;
    loop {
        match (bytes.get(pos), bytes.get(pos + 1)) {
            (Some(b'\n'), _) => pos += 1,
            (Some(b'\r'), Some(b'\n')) => pos += 2,
            _ => return pos,
        }
    }
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the frame is not complete yet, otherwise the frame
/// and the number of bytes it occupied (including the NUL).
fn parse_frame(buf: &str) -> Result<Option<(Frame, usize)>, Error> {
    let mut pos = 0;
    let mut lines = Vec::new();
    loop {
        let Some(nl) = buf[pos..].find('\n') else {
            return Ok(None);
        };
        let raw = &buf[pos..pos + nl];
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        pos += nl + 1;
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }

    let mut lines = lines.into_iter();
    let command_line = lines
        .next()
        .ok_or_else(|| Error::Protocol("frame without command".into()))?;
    let command: StompCommand = command_line
        .parse()
        .map_err(|_| Error::Protocol(format!("unknown command '{command_line}'")))?;

    let escaped = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed header line '{line}'")))?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| Error::Protocol(format!("invalid content-length '{v}'")))
        })
        .transpose()?;

    let body_start = pos;
    let (body_end, consumed) = match content_length {
        Some(len) => {
            let end = body_start
                .checked_add(len)
                .ok_or_else(|| Error::Protocol("content-length out of range".into()))?;
            match buf.as_bytes().get(end) {
                None => return Ok(None),
                Some(0) => (end, end + 1),
                Some(_) => {
                    return Err(Error::Protocol(
                        "frame body not NUL-terminated at content-length".into(),
                    ));
                }
            }
        }
        None => match buf[body_start..].find('\0') {
            Some(offset) => (body_start + offset, body_start + offset + 1),
            None => return Ok(None),
        },
    };

    let body = buf
        .get(body_start..body_end)
        .ok_or_else(|| Error::Protocol("content-length splits a UTF-8 sequence".into()))?
        .to_owned();

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        consumed,
    )))
}
