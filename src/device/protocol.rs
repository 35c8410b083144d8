//! RouterOS API sentence codec.
//!
//! A sentence is a sequence of length-prefixed words terminated by an empty
//! word. Commands are a path word followed by `?key=value` filter words and
//! `=key=value` attribute words. Replies start with `!re`, `!done`, `!trap`,
//! `!empty` or `!fatal`.
//!
//! Length prefix encoding:
//!
//! | length            | bytes | marker        |
//! |-------------------|-------|---------------|
//! | `< 0x80`          | 1     | `0xxxxxxx`    |
//! | `< 0x4000`        | 2     | `10xxxxxx`    |
//! | `< 0x200000`      | 3     | `110xxxxx`    |
//! | `< 0x10000000`    | 4     | `1110xxxx`    |
//! | otherwise         | 5     | `11110000`    |

use crate::IpWardenError;
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Attribute carrying an entry's opaque identifier.
pub const ID_ATTRIBUTE: &str = ".id";

/// Largest reply word accepted from the device (1 MiB).
pub const MAX_WORD_LEN: usize = 1024 * 1024;

/// One command sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Menu path plus verb, e.g. `/ip/firewall/address-list/print`.
    pub path: String,

    /// Filter parameters, rendered as `?key=value`.
    pub queries: Vec<(String, String)>,

    /// Set parameters, rendered as `=key=value`.
    pub attributes: Vec<(String, String)>,
}

impl Command {
    /// Command with no parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            queries: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Add a filter parameter.
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.queries.push((key.to_string(), value.into()));
        self
    }

    /// Add a set parameter.
    pub fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.push((key.to_string(), value.into()));
        self
    }

    /// Final path segment (`print`, `add`, `remove`, ...).
    pub fn verb(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Path without the verb.
    pub fn menu(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(menu, _)| menu)
            .unwrap_or("")
    }

    /// Whether the command changes device state.
    pub fn is_mutation(&self) -> bool {
        matches!(self.verb(), "add" | "remove" | "set")
    }

    /// Words as sent on the wire.
    pub fn words(&self) -> Vec<String> {
        let mut words = Vec::with_capacity(1 + self.queries.len() + self.attributes.len());
        words.push(self.path.clone());
        words.extend(self.queries.iter().map(|(k, v)| format!("?{}={}", k, v)));
        words.extend(self.attributes.iter().map(|(k, v)| format!("={}={}", k, v)));
        words
    }
}

/// Attributes of one returned entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry(BTreeMap<String, String>);

impl Entry {
    /// Empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set an attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Opaque identifier used to target removal.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_ATTRIBUTE)
    }

    /// Whether every `(key, value)` filter matches exactly.
    pub fn matches_all(&self, filters: &[(String, String)]) -> bool {
        filters
            .iter()
            .all(|(k, v)| self.get(k) == Some(v.as_str()))
    }

    /// Iterate attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Entry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One reply sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A data row.
    Re(Entry),
    /// End of the reply; may carry `ret`.
    Done(Entry),
    /// Command failed; carries `message`.
    Trap(Entry),
    /// Print matched nothing (newer firmware).
    Empty,
    /// Session is being torn down by the device.
    Fatal(String),
}

impl Reply {
    /// Parse reply words.
    pub fn parse(words: &[String]) -> Result<Self, IpWardenError> {
        let (head, rest) = words
            .split_first()
            .ok_or_else(|| IpWardenError::DeviceProtocol("empty reply sentence".to_string()))?;

        match head.as_str() {
            "!re" => Ok(Reply::Re(parse_attributes(rest))),
            "!done" => Ok(Reply::Done(parse_attributes(rest))),
            "!trap" => Ok(Reply::Trap(parse_attributes(rest))),
            "!empty" => Ok(Reply::Empty),
            "!fatal" => Ok(Reply::Fatal(rest.join(" "))),
            other => Err(IpWardenError::DeviceProtocol(format!(
                "unexpected reply word: {}",
                other
            ))),
        }
    }
}

/// Complete response to one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// `!re` rows.
    pub entries: Vec<Entry>,

    /// Attributes of the closing `!done`.
    pub done: Entry,
}

fn parse_attributes(words: &[String]) -> Entry {
    let mut entry = Entry::new();
    for word in words {
        // `=key=value`; the value may itself contain '='
        if let Some(body) = word.strip_prefix('=') {
            match body.split_once('=') {
                Some((key, value)) => entry.insert(key, value),
                None => entry.insert(body, ""),
            }
        }
        // `.tag=` and other control words are ignored
    }
    entry
}

/// Append the length prefix for a word of `len` bytes.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    let len = len as u32;
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x4000 {
        out.extend_from_slice(&(len | 0x8000).to_be_bytes()[2..]);
    } else if len < 0x20_0000 {
        out.extend_from_slice(&(len | 0xC0_0000).to_be_bytes()[1..]);
    } else if len < 0x1000_0000 {
        out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes());
    } else {
        out.push(0xF0);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

/// Read one length prefix.
pub fn read_length<R: Read>(reader: &mut R) -> Result<usize, IpWardenError> {
    let first = read_byte(reader)?;

    let (extra, initial) = if first & 0x80 == 0x00 {
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
        return Err(IpWardenError::DeviceProtocol(format!(
            "invalid length prefix byte: {:#04x}",
            first
        )));
    };

    let mut len = initial;
    for _ in 0..extra {
        len = (len << 8) | u32::from(read_byte(reader)?);
    }
    Ok(len as usize)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, IpWardenError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte).map_err(io_error)?;
    Ok(byte[0])
}

/// Encode a sentence, including the terminating empty word.
pub fn encode_sentence(words: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        encode_length(word.len(), &mut out);
        out.extend_from_slice(word.as_bytes());
    }
    out.push(0);
    out
}

/// Write a sentence and flush.
pub fn write_sentence<W: Write>(writer: &mut W, words: &[String]) -> Result<(), IpWardenError> {
    writer
        .write_all(&encode_sentence(words))
        .and_then(|_| writer.flush())
        .map_err(io_error)
}

/// Read one sentence (without its terminator).
///
/// Words longer than [`MAX_WORD_LEN`] are rejected before any allocation.
pub fn read_sentence<R: Read>(reader: &mut R) -> Result<Vec<String>, IpWardenError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader)?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(IpWardenError::DeviceProtocol(format!(
                "reply word too long: {} bytes",
                len
            )));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(io_error)?;
        let word = String::from_utf8(buf)
            .map_err(|_| IpWardenError::DeviceProtocol("reply word is not UTF-8".to_string()))?;
        words.push(word);
    }
}

/// Read reply sentences until `!done`.
///
/// A `!trap` is remembered and reported once `!done` arrives so the stream
/// stays aligned for the next command.
pub fn read_response<R: Read>(reader: &mut R, command: &str) -> Result<Response, IpWardenError> {
    let mut response = Response::default();
    let mut trap: Option<String> = None;

    loop {
        match Reply::parse(&read_sentence(reader)?)? {
            Reply::Re(entry) => response.entries.push(entry),
            Reply::Empty => {}
            Reply::Trap(entry) => {
                trap = Some(entry.get("message").unwrap_or("unknown error").to_string());
            }
            Reply::Fatal(message) => {
                return Err(IpWardenError::DeviceIo(format!(
                    "device closed session: {}",
                    message
                )));
            }
            Reply::Done(done) => {
                if let Some(message) = trap {
                    return Err(IpWardenError::DeviceTrap {
                        command: command.to_string(),
                        message,
                    });
                }
                response.done = done;
                return Ok(response);
            }
        }
    }
}

fn io_error(e: std::io::Error) -> IpWardenError {
    IpWardenError::DeviceIo(e.to_string())
}
