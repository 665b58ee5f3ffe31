// Routing topology for chat traffic: one topic exchange, `bunny.<channel>`
// routing keys, and topic-style binding patterns.
use bunny_common::ChannelName;
use std::fmt;

/// Routing-key namespace shared by every chat channel.
pub const NAMESPACE: &str = "bunny";
/// Name of the process-wide topic exchange.
pub const EXCHANGE: &str = "bunny.chats";
/// Binding used by the relay to see every channel.
pub const ALL_CHANNELS: &str = "bunny.*";
pub const SEPARATOR: char = '.';
// AMQP short strings cap routing keys at 255 bytes.
pub const MAX_ROUTING_KEY_BYTES: usize = 255;

pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("malformed routing key: {0}")]
    MalformedRoutingKey(String),
    #[error("invalid channel in routing key: {0}")]
    InvalidChannel(#[from] bunny_common::Error),
    #[error("invalid binding pattern: {0}")]
    InvalidPattern(String),
}

/// Exchange declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for ExchangeSpec {
    fn default() -> Self {
        Self {
            name: EXCHANGE.to_string(),
            durable: true,
            auto_delete: false,
        }
    }
}

/// Queue declaration parameters. Every consumer gets its own anonymous queue
/// that is exclusive to its connection and deleted with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    pub const EPHEMERAL: QueueSpec = QueueSpec {
        durable: false,
        exclusive: true,
        auto_delete: true,
    };
}

/// A routing key of the form `<namespace>.<channel>`.
///
/// ```
/// use bunny_common::ChannelName;
/// use bunny_router::RoutingKey;
///
/// let channel = ChannelName::new("team.chat").expect("channel");
/// let key = RoutingKey::for_channel(&channel);
/// assert_eq!(key.as_str(), "bunny.team.chat");
///
/// let parsed = RoutingKey::parse(key.as_str()).expect("parse");
/// assert_eq!(parsed.namespace(), "bunny");
/// assert_eq!(parsed.channel().as_str(), "team.chat");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    raw: String,
    split: usize,
    channel: ChannelName,
}

impl RoutingKey {
    // The channel goes in raw; escaping is a storage concern.
    pub fn for_channel(channel: &ChannelName) -> Self {
        let raw = format!("{NAMESPACE}{SEPARATOR}{channel}");
        Self {
            split: NAMESPACE.len(),
            raw,
            channel: channel.clone(),
        }
    }

    // Split on the first separator into namespace and channel.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((namespace, channel)) = raw.split_once(SEPARATOR) else {
            return Err(RoutingError::MalformedRoutingKey(raw.to_string()));
        };
        if namespace.is_empty() {
            return Err(RoutingError::MalformedRoutingKey(raw.to_string()));
        }
        let channel = ChannelName::new(channel)?;
        Ok(Self {
            raw: raw.to_string(),
            split: namespace.len(),
            channel,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn namespace(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn channel_str(&self) -> &str {
        self.channel.as_str()
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Topic binding pattern. Words are separated by `.`; `*` matches exactly one
/// word and `#` matches zero or more words.
///
/// ```
/// use bunny_router::BindingPattern;
///
/// let all = BindingPattern::all_channels();
/// assert!(all.matches("bunny.general"));
/// assert!(!all.matches("bunny.team.chat"));
/// assert!(BindingPattern::new("bunny.#").expect("pattern").matches("bunny.team.chat"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingPattern(String);

impl BindingPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern.len() > MAX_ROUTING_KEY_BYTES {
            return Err(RoutingError::InvalidPattern(pattern));
        }
        Ok(Self(pattern))
    }

    pub fn all_channels() -> Self {
        Self(ALL_CHANNELS.to_string())
    }

    // Exact-match binding for a single channel. Channels containing wildcard
    // words would widen the binding, so they are refused.
    pub fn exact(channel: &ChannelName) -> Result<Self> {
        if channel
            .as_str()
            .split(SEPARATOR)
            .any(|word| word == "*" || word == "#")
        {
            return Err(RoutingError::InvalidPattern(channel.to_string()));
        }
        Ok(Self(RoutingKey::for_channel(channel).raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.0.split(SEPARATOR).collect();
        let key: Vec<&str> = routing_key.split(SEPARATOR).collect();
        match_words(&pattern, &key)
    }
}

impl fmt::Display for BindingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}
