mod common;

use bytes::{BufMut, BytesMut};
use common::{fixed_feed, settings, test_feeds, variable_feed};
use feedstream_core::engine::EngineOptions;
use feedstream_core::error::Error;
use feedstream_core::ingest::sync::{put_frame, seal};
use feedstream_core::models::{EngineKind, LastValue};

fn fixed_payload(interval: u32, start: u32, values: &[f32]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(interval);
    payload.put_u32_le(start);
    for value in values {
        payload.put_f32_le(*value);
    }
    payload.to_vec()
}

fn variable_payload(records: &[(u32, f32)]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    for (time, value) in records {
        payload.put_u32_le(*time);
        payload.put_f32_le(*value);
    }
    payload.to_vec()
}

#[tokio::test]
async fn test_sync_applies_frames() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let fixed = fixed_feed(&t.feeds, 1, "fixed", 10).await;
    let variable = variable_feed(&t.feeds, 1, "variable").await;

    let mut body = BytesMut::new();
    put_frame(&mut body, fixed, &fixed_payload(10, 1000, &[1.0, 2.0, 3.0]))?;
    put_frame(&mut body, variable, &variable_payload(&[(500, 0.5), (700, 7.0)]))?;
    let synced = t.feeds.sync(1, &seal(&body)).await?;

    assert_eq!(synced.len(), 2);
    assert_eq!(synced[0].feedid, fixed);
    assert_eq!(synced[0].meta.start_time, Some(1000));
    assert_eq!(synced[0].meta.npoints, Some(3));
    assert_eq!(synced[1].feedid, variable);
    assert_eq!(synced[1].meta.npoints, Some(2));

    assert_eq!(t.feeds.get_value(fixed, Some(1010)).await?, Some(2.0));
    assert_eq!(t.feeds.get_timevalue(fixed).await?, Some(LastValue::new(1020, Some(3.0))));
    assert_eq!(t.feeds.get_timevalue(variable).await?, Some(LastValue::new(700, Some(7.0))));
    Ok(())
}

#[tokio::test]
async fn test_corrupted_blob_applies_nothing() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let fixed = fixed_feed(&t.feeds, 1, "fixed", 10).await;

    let mut body = BytesMut::new();
    put_frame(&mut body, fixed, &fixed_payload(10, 1000, &[1.0]))?;
    let mut blob = seal(&body);
    let last = blob.len() - 1;
    blob[last] ^= 0x01;

    let err = t.feeds.sync(1, &blob).await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));
    assert_eq!(err.message(), "Invalid checksum");
    assert_eq!(t.feeds.get_meta(fixed).await?.npoints, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_unowned_feed_aborts_after_earlier_frames() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let mine = fixed_feed(&t.feeds, 1, "mine", 10).await;
    let theirs = fixed_feed(&t.feeds, 2, "theirs", 10).await;
    let after = fixed_feed(&t.feeds, 1, "after", 10).await;

    let mut body = BytesMut::new();
    put_frame(&mut body, mine, &fixed_payload(10, 1000, &[1.0, 2.0]))?;
    put_frame(&mut body, theirs, &fixed_payload(10, 1000, &[5.0]))?;
    put_frame(&mut body, after, &fixed_payload(10, 1000, &[9.0]))?;

    let err = t.feeds.sync(1, &seal(&body)).await.unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));
    assert_eq!(err.message(), format!("Invalid feedid or access u=1 f={}", theirs));

    assert_eq!(t.feeds.get_meta(mine).await?.npoints, Some(2));
    assert_eq!(t.feeds.get_meta(theirs).await?.npoints, Some(0));
    assert_eq!(t.feeds.get_meta(after).await?.npoints, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_bad_frames() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let fixed = fixed_feed(&t.feeds, 1, "fixed", 10).await;

    // payload of a fixed frame must hold the interval and start
    let mut body = BytesMut::new();
    put_frame(&mut body, fixed, &[0, 0, 0])?;
    let err = t.feeds.sync(1, &seal(&body)).await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));

    // a header claiming more bytes than remain
    let mut body = BytesMut::new();
    body.put_u32_le(64);
    body.put_u32_le(fixed);
    let err = t.feeds.sync(1, &seal(&body)).await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));

    // an empty frame section is a valid no-op
    assert!(t.feeds.sync(1, &seal(&[])).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_relational_frames_are_skipped() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let table = t
        .feeds
        .create(1, "test", "table", EngineKind::MemoryTable.id(), &EngineOptions::default(), "")
        .await?;

    let mut body = BytesMut::new();
    put_frame(&mut body, table, &variable_payload(&[(500, 0.5)]))?;
    let synced = t.feeds.sync(1, &seal(&body)).await?;
    assert_eq!(synced.len(), 1);
    assert_eq!(t.feeds.export(table, 0).await?.len(), 0);
    Ok(())
}
