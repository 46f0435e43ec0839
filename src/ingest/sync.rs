//! Binary multi-feed sync.
//!
//! A sync blob is a sequence of frames followed by a CRC-32 of everything
//! before it. Each frame is `u32 total length | u32 feed id | payload`, all
//! little-endian, where the length counts the 8 header bytes. The payload
//! layout belongs to the feed's engine.

use crate::engine::EngineMeta;
use crate::error::{Error, Result};
use crate::feeds::Feeds;
use crate::models::{FeedId, UserId};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const CHECKSUM_BYTES: usize = 4;
pub const FRAME_HEADER_BYTES: usize = 8;

/// Checks the trailing checksum and returns the frame section.
pub fn validate_checksum(blob: &[u8]) -> Result<&[u8]> {
    if blob.len() < CHECKSUM_BYTES {
        return Err(Error::Integrity("Invalid checksum".to_string()));
    }
    let (body, mut trailer) = blob.split_at(blob.len() - CHECKSUM_BYTES);
    if crc32fast::hash(body) != trailer.get_u32_le() {
        return Err(Error::Integrity("Invalid checksum".to_string()));
    }
    Ok(body)
}

/// Appends the checksum to a frame section.
pub fn seal(body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(body.len() + CHECKSUM_BYTES);
    out.put_slice(body);
    out.put_u32_le(crc32fast::hash(body));
    out.to_vec()
}

/// Appends one frame to `out`.
pub fn put_frame(out: &mut BytesMut, feed: FeedId, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(FRAME_HEADER_BYTES + payload.len())
        .map_err(|_| Error::Validation("frame too large".to_string()))?;
    out.put_u32_le(len);
    out.put_u32_le(feed);
    out.put_slice(payload);
    Ok(())
}

/// One frame borrowed from a sync blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub feed: FeedId,
    pub payload: &'a [u8],
}

/// Walks the frames of a checksummed body. A malformed frame yields one
/// `Err` and ends the walk.
pub struct FrameReader<'a> {
    remaining: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { remaining: body }
    }

    fn next_frame(&mut self) -> Result<Frame<'a>> {
        if self.remaining.len() < FRAME_HEADER_BYTES {
            return Err(Error::Integrity("Truncated frame header".to_string()));
        }
        let mut header = &self.remaining[..FRAME_HEADER_BYTES];
        let len = header.get_u32_le() as usize;
        let feed = header.get_u32_le();
        if len < FRAME_HEADER_BYTES || len > self.remaining.len() {
            return Err(Error::Integrity(format!("Invalid frame length {} for feed {}", len, feed)));
        }
        let (frame, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Ok(Frame {
            feed,
            payload: &frame[FRAME_HEADER_BYTES..],
        })
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = Result<Frame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let frame = self.next_frame();
        if frame.is_err() {
            self.remaining = &[];
        }
        Some(frame)
    }
}

/// Storage statistics of a feed after its frame was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncedFeed {
    pub feedid: FeedId,
    pub meta: EngineMeta,
}

impl Feeds {
    /// Applies a sync blob on behalf of `userid`.
    ///
    /// Frames are applied in order. The first failing frame aborts the sync;
    /// frames before it stay applied. Frames for feeds whose engine is not
    /// file-backed are skipped but still reported.
    pub async fn sync(&self, userid: UserId, blob: &[u8]) -> Result<Vec<SyncedFeed>> {
        let body = validate_checksum(blob)?;
        let mut synced = Vec::new();

        for frame in FrameReader::new(body) {
            let frame = frame?;
            if !self.access(userid, frame.feed).await? {
                return Err(Error::Authorization(format!(
                    "Invalid feedid or access u={} f={}",
                    userid, frame.feed
                )));
            }

            let record = self.get(frame.feed).await?;
            let engine = self.engine_for(&record);
            let applied = record.kind().map_or(false, |kind| kind.is_file_backed());
            let meta = if applied {
                engine.backend().sync(frame.feed, frame.payload).await?;
                self.refresh_lastvalue(frame.feed, &engine).await?;
                engine.backend().get_meta(frame.feed).await?
            } else {
                debug!("Skipping sync frame for feed {} ({})", frame.feed, engine.backend().name());
                engine.backend().get_meta(frame.feed).await.unwrap_or_else(|e| {
                    warn!("Could not read meta of feed {}: {}", frame.feed, e);
                    EngineMeta::default()
                })
            };
            synced.push(SyncedFeed {
                feedid: frame.feed,
                meta,
            });
        }

        info!("Synced {} feeds for user {}", synced.len(), userid);
        Ok(synced)
    }
}
