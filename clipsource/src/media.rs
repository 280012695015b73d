//! Media handles: the asset opened by the session builder and the playback
//! handle a preload slot drives.

use crate::error::Result;
use crate::models::MediaFormat;
use crate::session::Session;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

const OPTIMIZED_READ_AHEAD_BYTES: usize = 2 * 1024 * 1024;
const SLOW_FORMAT_READ_AHEAD_BYTES: usize = 8 * 1024 * 1024;
const OPTIMIZED_FORWARD_BUFFER: Duration = Duration::from_secs(5);
const SLOW_FORMAT_FORWARD_BUFFER: Duration = Duration::from_secs(15);

/// Format-specific tuning applied when opening an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub read_ahead_bytes: usize,
    pub preferred_forward_buffer: Duration,
}

impl OpenOptions {
    /// Less optimized containers get a larger read-ahead and forward buffer.
    pub fn for_format(format: MediaFormat) -> Self {
        if format.is_optimized() {
            Self {
                read_ahead_bytes: OPTIMIZED_READ_AHEAD_BYTES,
                preferred_forward_buffer: OPTIMIZED_FORWARD_BUFFER,
            }
        } else {
            Self {
                read_ahead_bytes: SLOW_FORMAT_READ_AHEAD_BYTES,
                preferred_forward_buffer: SLOW_FORMAT_FORWARD_BUFFER,
            }
        }
    }
}

/// An opened media resource. Dropping the last reference releases it.
#[async_trait]
pub trait MediaAsset: Send + Sync {
    fn locator(&self) -> &Url;

    /// Loads container metadata and returns the real duration in seconds.
    async fn probe_duration(&self) -> Result<f64>;
}

#[async_trait]
pub trait MediaOpener: Send + Sync {
    async fn open(
        &self,
        locator: &Url,
        options: OpenOptions,
    ) -> Result<std::sync::Arc<dyn MediaAsset>>;
}

/// Buffer signal reported by a playback handle.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferStatus {
    Buffering {
        buffered_seconds: f64,
        likely_to_keep_up: bool,
    },
    /// The item cannot be played (unsupported or corrupt media).
    Failed { reason: String },
}

impl BufferStatus {
    pub fn is_keeping_up(&self) -> bool {
        matches!(
            self,
            Self::Buffering {
                likely_to_keep_up: true,
                ..
            }
        )
    }

    pub fn buffered_seconds(&self) -> f64 {
        match self {
            Self::Buffering {
                buffered_seconds, ..
            } => *buffered_seconds,
            Self::Failed { .. } => 0.0,
        }
    }
}

/// A player bound to one session, used to warm up the buffer before a transition.
#[async_trait]
pub trait PlaybackHandle: Send + Sync {
    fn set_muted(&self, muted: bool);

    fn pause(&self);

    async fn seek(&self, seconds: f64) -> Result<()>;

    fn buffer_status(&self) -> BufferStatus;
}

#[async_trait]
pub trait Player: Send + Sync {
    async fn prepare(&self, session: &Session) -> Result<Box<dyn PlaybackHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_options_by_format() {
        let fast = OpenOptions::for_format(MediaFormat::H264);
        let slow = OpenOptions::for_format(MediaFormat::Ogg);
        assert!(slow.read_ahead_bytes > fast.read_ahead_bytes);
        assert!(slow.preferred_forward_buffer > fast.preferred_forward_buffer);
    }

    #[test]
    fn test_buffer_status_helpers() {
        let ready = BufferStatus::Buffering {
            buffered_seconds: 4.0,
            likely_to_keep_up: true,
        };
        assert!(ready.is_keeping_up());
        assert_eq!(ready.buffered_seconds(), 4.0);

        let failed = BufferStatus::Failed {
            reason: "bad moov atom".into(),
        };
        assert!(!failed.is_keeping_up());
        assert_eq!(failed.buffered_seconds(), 0.0);
    }
}
