use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A file produced or referenced during a turn.
///
/// The backend sends either a bare URL or a structured record; both forms are
/// accepted and preserved as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attachment {
    Url(String),
    Complex(ComplexAttachment),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexAttachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Attachment {
    /// Dedup key: the literal string, or the structured record's `url`.
    pub fn canonical_key(&self) -> &str {
        match self {
            Attachment::Url(url) => url,
            Attachment::Complex(complex) => &complex.url,
        }
    }
}

impl From<&str> for Attachment {
    fn from(url: &str) -> Self {
        Attachment::Url(url.to_string())
    }
}

/// Insertion-ordered attachment set keyed by [`Attachment::canonical_key`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentSet {
    entries: IndexMap<String, Attachment>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the attachment was new. Re-adding a key keeps the first value.
    pub fn insert(&mut self, attachment: Attachment) -> bool {
        let key = attachment.canonical_key().to_string();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, attachment);
        true
    }

    /// Merge a batch of attachments, returning how many were new.
    pub fn extend<I>(&mut self, attachments: I) -> usize
    where
        I: IntoIterator<Item = Attachment>,
    {
        attachments
            .into_iter()
            .map(|a| self.insert(a))
            .filter(|added| *added)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Full value set in insertion order.
    pub fn to_files(&self) -> Vec<Attachment> {
        self.entries.values().cloned().collect()
    }
}
