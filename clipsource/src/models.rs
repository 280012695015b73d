//! Data models for archive metadata responses

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Deserialize an optional string or number into Option<u64>
fn deserialize_optional_string_or_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        Number(u64),
    }

    match Option::<StringOrU64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrU64::String(s)) if s.is_empty() => Ok(None),
        Some(StringOrU64::String(s)) => s.parse::<u64>().map(Some).map_err(D::Error::custom),
        Some(StringOrU64::Number(n)) => Ok(Some(n)),
    }
}

/// Deserialize a length that may be sent as a number or as a string
fn deserialize_optional_length<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Float(f64),
    }

    Ok(
        match Option::<StringOrNumber>::deserialize(deserializer)? {
            None => None,
            Some(StringOrNumber::String(s)) => Some(s),
            Some(StringOrNumber::Float(f)) => Some(f.to_string()),
        },
    )
}

/// Collections are a single string or a list depending on the item
fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Parses an archive `length` field: plain seconds (`"93.5"`), `mm:ss` or `hh:mm:ss`.
pub fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if !raw.contains(':') {
        return raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0);
    }

    let mut total = 0.0;
    for part in raw.split(':') {
        let value = part.parse::<f64>().ok()?;
        if value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

/// Video container/codec families found in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    H264,
    Mpeg4,
    WebM,
    Ogg,
    Mpeg2,
    Other,
}

impl MediaFormat {
    /// Guesses the format from the archive `format` label, then from the file extension.
    pub fn detect(format: &str, name: &str) -> Self {
        let label = format.to_ascii_lowercase();
        if label.contains("h.264") || label.contains("h264") {
            return Self::H264;
        }
        if label.contains("mpeg4") {
            return Self::Mpeg4;
        }
        if label.contains("webm") {
            return Self::WebM;
        }
        if label.contains("ogg video") || label.contains("theora") {
            return Self::Ogg;
        }
        if label.contains("mpeg2") {
            return Self::Mpeg2;
        }

        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" | "m4v" => Self::Mpeg4,
            "webm" => Self::WebM,
            "ogv" => Self::Ogg,
            "mpg" | "mpeg" => Self::Mpeg2,
            _ => Self::Other,
        }
    }

    pub fn is_playable(self) -> bool {
        !matches!(self, Self::Other)
    }

    /// Formats the player streams efficiently over byte ranges.
    pub fn is_optimized(self) -> bool {
        matches!(self, Self::H264 | Self::Mpeg4)
    }
}

/// A single file entry of an archive item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default, deserialize_with = "deserialize_optional_string_or_u64")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_length")]
    pub length: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            size: None,
            length: None,
        }
    }

    pub fn with_length(mut self, seconds: f64) -> Self {
        self.length = Some(format!("{seconds:.2}"));
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn media_format(&self) -> MediaFormat {
        MediaFormat::detect(&self.format, &self.name)
    }

    pub fn length_seconds(&self) -> Option<f64> {
        self.length.as_deref().and_then(parse_length)
    }

    /// Playable video with a non-empty payload.
    pub fn is_playable(&self) -> bool {
        self.media_format().is_playable() && self.size != Some(0)
    }

    /// File name without extension; derivatives of one source share it.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawItemMetadata {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    collection: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    metadata: RawItemMetadata,
    #[serde(default)]
    files: Vec<FileRef>,
}

/// Metadata of an archive item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub collections: Vec<String>,
    pub files: Vec<FileRef>,
}

impl Metadata {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: String::new(),
            description: String::new(),
            collections: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Parses the archive's item metadata document (`{"metadata": {...}, "files": [...]}`).
    pub fn from_archive_json(identifier: &str, body: &str) -> serde_json::Result<Self> {
        let raw: RawItem = serde_json::from_str(body)?;
        let identifier = if raw.metadata.identifier.is_empty() {
            identifier.to_string()
        } else {
            raw.metadata.identifier
        };
        Ok(Self {
            identifier,
            title: raw.metadata.title.unwrap_or_default(),
            description: raw.metadata.description.unwrap_or_default(),
            collections: raw.metadata.collection,
            files: raw.files,
        })
    }

    /// First listed collection, or an empty string.
    pub fn primary_collection(&self) -> &str {
        self.collections.first().map(String::as_str).unwrap_or("")
    }

    /// Number of distinct playable sources; derivatives of one file count once.
    pub fn distinct_media_files(&self) -> usize {
        let stems: HashSet<&str> = self
            .files
            .iter()
            .filter(|f| f.is_playable())
            .map(FileRef::stem)
            .collect();
        stems.len().max(1)
    }
}
