mod common;

use common::{fixed_feed, settings, test_feeds, variable_feed};
use feedstream_core::error::Error;
use feedstream_core::models::LastValue;
use feedstream_core::query::{FeedData, QueryParams};
use feedstream_core::time::{Interval, Timestamp};

#[tokio::test]
async fn test_post_moves_last_value() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = fixed_feed(&t.feeds, 1, "power", 10).await;
    assert_eq!(t.feeds.get_timevalue(id).await?, None);

    let stored = t.feeds.post(id, 1000, None, 5.0, None).await?;
    assert_eq!(stored, 5.0);
    assert_eq!(t.feeds.get_timevalue(id).await?, Some(LastValue::new(1000, Some(5.0))));
    assert_eq!(t.feeds.get_value(id, Some(1000)).await?, Some(5.0));

    // the store holds the same pair as the cache
    let stored = t.feeds.store().load(id).await?.expect("record");
    assert_eq!((stored.time, stored.value), (Some(1000), Some(5.0)));
    Ok(())
}

#[tokio::test]
async fn test_post_to_missing_feed() {
    let t = test_feeds(settings(false));
    let err = t.feeds.post(42, 1000, None, 1.0, None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.message(), "Feed does not exist");
}

#[tokio::test]
async fn test_post_multiple() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = variable_feed(&t.feeds, 1, "temperature").await;

    let err = t.feeds.post_multiple(id, &[], None).await.unwrap_err();
    assert_eq!(err.message(), "Data empty");

    t.feeds
        .post_multiple(id, &[(100, 1.0), (200, 2.0), (300, 3.0)], None)
        .await?;
    assert_eq!(t.feeds.get_timevalue(id).await?, Some(LastValue::new(300, Some(3.0))));

    // an older batch is stored but leaves the last value alone
    t.feeds.post_multiple(id, &[(150, 1.5)], None).await?;
    assert_eq!(t.feeds.get_timevalue(id).await?, Some(LastValue::new(300, Some(3.0))));
    assert_eq!(t.feeds.get_value(id, Some(160)).await?, Some(1.5));

    // larger batches take the bulk path
    let batch: Vec<(i64, f64)> = (0..20).map(|i| (1000 + i * 10, i as f64)).collect();
    t.feeds.post_multiple(id, &batch, None).await?;
    assert_eq!(t.feeds.get_timevalue(id).await?, Some(LastValue::new(1190, Some(19.0))));
    assert_eq!(t.feeds.export(id, 0).await?.len(), 24);
    Ok(())
}

#[tokio::test]
async fn test_uploads_check_engine() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let fixed = fixed_feed(&t.feeds, 1, "fixed", 10).await;
    let variable = variable_feed(&t.feeds, 1, "variable").await;

    let err = t
        .feeds
        .upload_fixed_interval(variable, 1000, 10, &[Some(1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert_eq!(err.message(), "Feed upload not supported for this engine");

    t.feeds
        .upload_fixed_interval(fixed, 1000, 10, &[Some(1.0), None, Some(3.0)])
        .await?;
    assert_eq!(t.feeds.get_timevalue(fixed).await?, Some(LastValue::new(1020, Some(3.0))));

    t.feeds.upload_variable_interval(variable, &[(50, 0.5), (60, 0.75)]).await?;
    assert_eq!(t.feeds.get_timevalue(variable).await?, Some(LastValue::new(60, Some(0.75))));
    assert!(t.feeds.upload_variable_interval(fixed, &[(50, 0.5)]).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_buffered_post_and_flush() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let id = fixed_feed(&t.feeds, 1, "buffered", 10).await;

    // disk holds 1000 and 1010; 1020 only lives in the buffer
    t.feeds.post_multiple(id, &[(1000, 1.0), (1010, 2.0)], None).await?;
    t.feeds.post(id, 1020, None, 3.0, None).await?;
    t.feeds.post(id, 1025, Some(1010), 99.0, None).await?;
    assert_eq!(t.feeds.get_buffer_size(), 2);

    let params = QueryParams::new(id, 1000, 1020, Interval::Seconds(10));
    let data = t.feeds.get_data(&params).await?;
    assert_eq!(
        data,
        FeedData::Series(vec![
            (Timestamp::Millis(1_000_000), Some(1.0)),
            (Timestamp::Millis(1_010_000), Some(2.0)),
            (Timestamp::Millis(1_020_000), Some(3.0)),
        ])
    );

    assert_eq!(t.feeds.flush_buffer(id).await?, 2);
    assert_eq!(t.feeds.get_buffer_size(), 0);
    assert_eq!(t.feeds.flush_buffer(id).await?, 0);
    assert_eq!(t.feeds.get_value(id, Some(1020)).await?, Some(3.0));
    // the flush writes 99 into the 1010 slot
    assert_eq!(t.feeds.get_value(id, Some(1010)).await?, Some(99.0));
    Ok(())
}

#[tokio::test]
async fn test_clear_drops_buffered_points() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let id = fixed_feed(&t.feeds, 1, "cleared", 10).await;
    t.feeds.post(id, 1000, None, 1.0, None).await?;
    assert_eq!(t.feeds.get_buffer_size(), 1);

    t.feeds.clear(id).await?;
    assert_eq!(t.feeds.get_buffer_size(), 0);
    assert_eq!(t.feeds.get_timevalue(id).await?, Some(LastValue::new(1000, Some(0.0))));
    Ok(())
}

#[tokio::test]
async fn test_buffered_posts_to_unwritten_feed_are_readable() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let id = fixed_feed(&t.feeds, 1, "fresh", 10).await;
    t.feeds.post(id, 1000, None, 1.5, None).await?;
    t.feeds.post(id, 1010, None, 2.5, None).await?;
    t.feeds.post(id, 1020, None, 3.5, None).await?;
    assert_eq!(t.feeds.get_buffer_size(), 3);

    let mut params = QueryParams::new(id, 1000, 1020, Interval::Seconds(10));
    params.timeformat = "unix".to_string();
    let data = t.feeds.get_data(&params).await?;
    assert_eq!(
        data,
        FeedData::Series(vec![
            (Timestamp::Seconds(1000), Some(1.5)),
            (Timestamp::Seconds(1010), Some(2.5)),
            (Timestamp::Seconds(1020), Some(3.5)),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_flush_all_buffers() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let fixed = fixed_feed(&t.feeds, 1, "fixed", 10).await;
    let variable = variable_feed(&t.feeds, 1, "variable").await;
    t.feeds.post(fixed, 1000, None, 1.0, None).await?;
    t.feeds.post(fixed, 1010, None, 2.0, None).await?;
    t.feeds.post(variable, 1005, None, 4.0, None).await?;
    assert_eq!(t.feeds.get_buffer_size(), 3);

    assert_eq!(t.feeds.flush_all_buffers().await?, 3);
    assert_eq!(t.feeds.get_buffer_size(), 0);
    assert_eq!(t.feeds.flush_all_buffers().await?, 0);
    assert_eq!(t.feeds.get_value(fixed, Some(1010)).await?, Some(2.0));
    assert_eq!(t.feeds.get_value(variable, Some(1005)).await?, Some(4.0));
    Ok(())
}
