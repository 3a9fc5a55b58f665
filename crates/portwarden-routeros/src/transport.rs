//! Async TCP transport for the RouterOS API
//!
//! The API exchanges sentences: a run of length-prefixed words closed by a
//! zero-length word. Replies start with `!re`, `!done`, `!trap` or `!fatal`
//! and carry their attributes as `=key=value` words.

use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::HostTableError;

/// Attributes of one `!re` reply
pub type Row = HashMap<String, String>;

/// Longest word accepted from a peer
pub const MAX_WORD_LEN: usize = 64 * 1024;

/// Encode a word length prefix
pub fn encode_length(len: usize) -> Vec<u8> {
    let len = len as u32;
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        v.to_be_bytes().to_vec()
    } else {
        let mut out = vec![0xF0];
        out.extend_from_slice(&len.to_be_bytes());
        out
    }
}

/// Encode one word: length prefix followed by its bytes
pub fn encode_word(word: &str) -> Vec<u8> {
    let mut out = encode_length(word.len());
    out.extend_from_slice(word.as_bytes());
    out
}

/// Encode a whole sentence including the terminating empty word
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        out.extend(encode_word(word.as_ref()));
    }
    out.push(0);
    out
}

/// Read a word length prefix
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize, HostTableError> {
    let first = reader.read_u8().await?;

    let (extra, mut len) = if first & 0x80 == 0x00 {
        (0, u32::from(first))
    } else if first & 0xC0 == 0x80 {
        (1, u32::from(first & 0x3F))
    } else if first & 0xE0 == 0xC0 {
        (2, u32::from(first & 0x1F))
    } else if first & 0xF0 == 0xE0 {
        (3, u32::from(first & 0x0F))
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(HostTableError::Protocol(format!(
            "unexpected control byte 0x{first:02X}"
        )));
    };

    for _ in 0..extra {
        len = (len << 8) | u32::from(reader.read_u8().await?);
    }
    Ok(len as usize)
}

/// Read one sentence; an empty vector means the peer sent an empty sentence.
pub async fn read_sentence<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, HostTableError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(HostTableError::Protocol(format!(
                "word of {len} bytes exceeds {MAX_WORD_LEN}"
            )));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let word = String::from_utf8(buf)
            .map_err(|_| HostTableError::Protocol("word is not valid UTF-8".to_string()))?;
        words.push(word);
    }
}

/// Split `=key=value` attribute words into a map; other words are ignored.
pub fn parse_attributes(words: &[String]) -> Row {
    words
        .iter()
        .filter_map(|w| w.strip_prefix('='))
        .filter_map(|w| w.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One API session over TCP
pub struct ApiConnection<S = TcpStream> {
    stream: BufReader<S>,
    timeout: Duration,
}

impl ApiConnection<TcpStream> {
    /// Connect to `host:port`, bounded by `timeout`
    pub async fn connect(host: &str, port: u16, timeout_after: Duration) -> Result<Self, HostTableError> {
        let stream = match timeout(timeout_after, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(HostTableError::Connect {
                    target: format!("{host}:{port}"),
                    source: e,
                })
            }
            Err(_) => return Err(HostTableError::Timeout(timeout_after)),
        };
        debug!(host, port, "Connected to RouterOS API");
        Ok(Self::new(stream, timeout_after))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ApiConnection<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    async fn write_sentence<W: AsRef<str>>(&mut self, words: &[W]) -> Result<(), HostTableError> {
        let bytes = encode_sentence(words);
        let limit = self.timeout;
        let stream = &mut self.stream;
        timeout(limit, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| HostTableError::Timeout(limit))??;
        Ok(())
    }

    async fn next_sentence(&mut self) -> Result<Vec<String>, HostTableError> {
        let limit = self.timeout;
        timeout(limit, read_sentence(&mut self.stream))
            .await
            .map_err(|_| HostTableError::Timeout(limit))?
    }

    /// Send a command and collect its `!re` rows up to `!done`.
    ///
    /// A `!trap` is reported once the closing `!done` arrives; `!fatal`
    /// ends the session immediately. Newer RouterOS releases answer a print
    /// without results with `!empty` before `!done`.
    pub async fn command<W: AsRef<str>>(&mut self, words: &[W]) -> Result<Vec<Row>, HostTableError> {
        let command = words
            .first()
            .map(|w| w.as_ref().to_string())
            .unwrap_or_default();
        trace!(command = %command, words = words.len(), "Sending RouterOS command");
        self.write_sentence(words).await?;

        let mut rows = Vec::new();
        let mut trap: Option<String> = None;
        loop {
            let sentence = self.next_sentence().await?;
            let Some(reply) = sentence.first() else {
                continue;
            };
            match reply.as_str() {
                "!re" => rows.push(parse_attributes(&sentence[1..])),
                "!done" => break,
                "!empty" => {}
                "!trap" => {
                    let attrs = parse_attributes(&sentence[1..]);
                    trap = Some(attrs.get("message").cloned().unwrap_or_default());
                }
                "!fatal" => {
                    let reason = sentence.get(1).cloned().unwrap_or_default();
                    return Err(HostTableError::Protocol(format!("fatal: {reason}")));
                }
                other => {
                    return Err(HostTableError::Protocol(format!("unexpected reply {other:?}")));
                }
            }
        }

        if let Some(message) = trap {
            return Err(HostTableError::Trap { command, message });
        }
        debug!(command = %command, rows = rows.len(), "RouterOS command done");
        Ok(rows)
    }
}
