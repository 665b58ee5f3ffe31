// Channel names and the storage identifiers derived from them.
//
// Storage identifiers only ever contain `[a-z0-9_]`. Every byte outside
// `[a-z0-9]` is written as `_` followed by two lower-case hex digits, so `_`
// always starts an escape and the mapping stays injective. Upper-case letters
// are escaped too because SQL engines fold unquoted identifiers.
use super::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Longest accepted channel name, in bytes.
pub const MAX_CHANNEL_NAME_BYTES: usize = 200;

const TABLE_PREFIX: &str = "chat_";
const ESCAPE: char = '_';
const HEX: &[u8; 16] = b"0123456789abcdef";

/// A validated, user-chosen channel name.
///
/// ```
/// use bunny_common::ChannelName;
///
/// let channel = ChannelName::new("team.chat").expect("valid");
/// assert_eq!(channel.as_str(), "team.chat");
/// assert!(ChannelName::new("").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidChannelName(
                "channel name is empty".to_string(),
            ));
        }
        if name.len() > MAX_CHANNEL_NAME_BYTES {
            return Err(Error::InvalidChannelName(format!(
                "channel name exceeds {MAX_CHANNEL_NAME_BYTES} bytes"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    // Canonical storage identifier for this channel's log.
    pub fn storage_id(&self) -> StorageId {
        StorageId::encode(self)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChannelName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::new(input)
    }
}

/// Escaped, collision-free token used to address a channel's log in storage.
///
/// ```
/// use bunny_common::StorageId;
///
/// let dotted = StorageId::from_channel_name("team.chat").expect("valid");
/// let underscored = StorageId::from_channel_name("team_chat").expect("valid");
/// assert_eq!(dotted.as_str(), "team_2echat");
/// assert_eq!(underscored.as_str(), "team_5fchat");
/// assert_eq!(dotted.table_name(), "chat_team_2echat");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(String);

impl StorageId {
    pub fn encode(channel: &ChannelName) -> Self {
        let name = channel.as_str();
        let mut out = String::with_capacity(name.len());
        for byte in name.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
                out.push(byte as char);
            } else {
                out.push(ESCAPE);
                out.push(HEX[(byte >> 4) as usize] as char);
                out.push(HEX[(byte & 0x0f) as usize] as char);
            }
        }
        Self(out)
    }

    // Validate and encode a raw channel name in one step.
    pub fn from_channel_name(name: &str) -> Result<Self> {
        ChannelName::new(name).map(|channel| Self::encode(&channel))
    }

    // Recover a storage id from a table name produced by `table_name`.
    pub fn from_table_name(table: &str) -> Result<Self> {
        let token = table.strip_prefix(TABLE_PREFIX).ok_or_else(|| {
            Error::InvalidChannelName(format!("not a channel table: {table}"))
        })?;
        let id = Self(token.to_string());
        // Reject tokens the encoder could never have produced.
        id.decode()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Table holding this channel's log. Only `[a-z0-9_]` can appear here.
    pub fn table_name(&self) -> String {
        format!("{TABLE_PREFIX}{}", self.0)
    }

    pub fn timestamp_index_name(&self) -> String {
        format!("idx_{TABLE_PREFIX}{}_timestamp", self.0)
    }

    /// Reverse the encoding. Only used for diagnostics.
    pub fn decode(&self) -> Result<ChannelName> {
        let bytes = self.0.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut idx = 0;
        while idx < bytes.len() {
            let byte = bytes[idx];
            if byte == ESCAPE as u8 {
                let hi = bytes.get(idx + 1).copied().and_then(hex_value);
                let lo = bytes.get(idx + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => {
                        return Err(Error::InvalidChannelName(format!(
                            "truncated escape at byte {idx} in {}",
                            self.0
                        )));
                    }
                }
                idx += 3;
            } else if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
                out.push(byte);
                idx += 1;
            } else {
                return Err(Error::InvalidChannelName(format!(
                    "unexpected byte {byte:#04x} in {}",
                    self.0
                )));
            }
        }
        let name = String::from_utf8(out)
            .map_err(|_| Error::InvalidChannelName(format!("not utf-8: {}", self.0)))?;
        ChannelName::new(name)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(name: &str) -> String {
        StorageId::from_channel_name(name)
            .expect("valid channel")
            .as_str()
            .to_string()
    }

    #[test]
    fn safe_names_pass_through() {
        assert_eq!(encode("general"), "general");
        assert_eq!(encode("room42"), "room42");
    }

    #[test]
    fn separator_and_underscore_do_not_collide() {
        let dotted = encode("team.chat");
        let underscored = encode("team_chat");
        assert_ne!(dotted, underscored);
        assert_eq!(dotted, "team_2echat");
        assert_eq!(underscored, "team_5fchat");
    }

    #[test]
    fn case_differences_do_not_collide() {
        assert_ne!(encode("Team"), encode("team"));
        assert_eq!(encode("Team"), "_54eam");
    }

    #[test]
    fn injection_attempt_is_escaped() {
        let id = encode("x; DROP TABLE chat_general; --");
        assert!(
            id.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        );
        assert!(!id.contains(' '));
        assert!(!id.contains(';'));
    }

    #[test]
    fn multibyte_names_escape_each_byte() {
        // "ч" is 0xd1 0x87 in UTF-8.
        assert_eq!(encode("ч"), "_d1_87");
    }

    #[test]
    fn decode_reverses_encode() {
        for name in ["team.chat", "team_chat", "Team", "чат", "a b/c", "x%y"] {
            let id = StorageId::from_channel_name(name).expect("valid");
            assert_eq!(id.decode().expect("decode").as_str(), name);
        }
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        let id = StorageId("abc_4".to_string());
        assert!(matches!(id.decode(), Err(Error::InvalidChannelName(_))));
    }

    #[test]
    fn table_name_round_trips() {
        let id = StorageId::from_channel_name("team.chat").expect("valid");
        let table = id.table_name();
        assert_eq!(table, "chat_team_2echat");
        assert_eq!(StorageId::from_table_name(&table).expect("parse"), id);
        assert!(StorageId::from_table_name("users").is_err());
        assert!(StorageId::from_table_name("chat_Bad").is_err());
    }

    #[test]
    fn empty_and_oversized_names_are_rejected() {
        assert!(matches!(
            ChannelName::new(""),
            Err(Error::InvalidChannelName(_))
        ));
        let long = "a".repeat(MAX_CHANNEL_NAME_BYTES + 1);
        assert!(matches!(
            ChannelName::new(long),
            Err(Error::InvalidChannelName(_))
        ));
        let max = "a".repeat(MAX_CHANNEL_NAME_BYTES);
        assert!(ChannelName::new(max).is_ok());
    }

    #[test]
    fn channel_name_parses_from_str() {
        let channel: ChannelName = "lobby".parse().expect("parse");
        assert_eq!(channel.to_string(), "lobby");
    }
}
