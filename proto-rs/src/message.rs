use serde::{Deserialize, Serialize};

/// What a `download` command asks for - one bundle or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownloadTarget {
    One(String),
    Many(Vec<String>),
}

impl DownloadTarget {
    /// Bundle names in request order
    pub fn names(&self) -> Vec<&str> {
        match self {
            DownloadTarget::One(name) => vec![name.as_str()],
            DownloadTarget::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for DownloadTarget {
    fn from(name: &str) -> Self {
        DownloadTarget::One(name.to_string())
    }
}

impl From<Vec<String>> for DownloadTarget {
    fn from(names: Vec<String>) -> Self {
        DownloadTarget::Many(names)
    }
}

/// Commands sent by a host page to the caching agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ClientMessage {
    Download(DownloadTarget),
    Clear,
    Check,
}

impl ClientMessage {
    /// Parse a host page message.
    ///
    /// Anything that is not a well-formed command (bad JSON, missing or
    /// unknown `type`, wrong `content` shape) yields `None` and is meant to
    /// be dropped without a reply.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Bundle status snapshot carried by a `complete` broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    /// Bundle names confirmed fully cached
    pub cached: Vec<String>,
    /// Cache generation the names refer to
    pub version: String,
}

/// Messages broadcast by the caching agent to every connected host page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ServerMessage {
    Complete(CacheStatus),
    Reload,
}

impl ServerMessage {
    pub fn complete(cached: Vec<String>, version: impl Into<String>) -> Self {
        ServerMessage::Complete(CacheStatus {
            cached,
            version: version.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
