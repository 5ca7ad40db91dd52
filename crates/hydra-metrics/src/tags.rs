//! Tag keys and tag sets.

use std::collections::BTreeMap;

use serde::Serialize;

/// Dimensions a measurement can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKey {
    /// Head label.
    Name,
    PeerId,
    Status,
    Direction,
    UsesFd,
    Protocol,
    Service,
    Operation,
    HttpCode,
    ErrorCode,
}

impl TagKey {
    pub const ALL: [TagKey; 10] = [
        TagKey::Name,
        TagKey::PeerId,
        TagKey::Status,
        TagKey::Direction,
        TagKey::UsesFd,
        TagKey::Protocol,
        TagKey::Service,
        TagKey::Operation,
        TagKey::HttpCode,
        TagKey::ErrorCode,
    ];

    /// Inverse of [`TagKey::as_str`].
    pub fn from_name(name: &str) -> Option<TagKey> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKey::Name => "name",
            TagKey::PeerId => "peer_id",
            TagKey::Status => "status",
            TagKey::Direction => "direction",
            TagKey::UsesFd => "uses_fd",
            TagKey::Protocol => "protocol",
            TagKey::Service => "service",
            TagKey::Operation => "operation",
            TagKey::HttpCode => "http_code",
            TagKey::ErrorCode => "error_code",
        }
    }
}

/// Outcome of a provider lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Answered from the local store.
    Local,
    /// Upstream lookup found providers.
    Succeeded,
    /// Upstream lookup found nothing.
    Failed,
    /// Dropped: already pending or the queue was full.
    Discarded,
    /// Skipped because of a recent failure.
    FailedCached,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Local => "local",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Discarded => "discarded",
            Status::FailedCached => "failed-cached",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of tag values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TagSet(BTreeMap<TagKey, String>);

impl TagSet {
    /// An empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag set with only a status.
    pub fn status(status: Status) -> Self {
        Self::new().with(TagKey::Status, status.as_str())
    }

    /// Add or replace a tag.
    pub fn with(mut self, key: TagKey, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn get(&self, key: TagKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Keep only the given keys.
    pub fn project(&self, keys: &[TagKey]) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{}={}", key.as_str(), value)?;
        }
        Ok(())
    }
}
