mod common;

use common::{fixed_feed, settings, test_feeds, variable_feed};
use feedstream_core::engine::EngineOptions;
use feedstream_core::error::Error;
use feedstream_core::models::EngineKind;
use feedstream_core::query::{FeedData, QueryParams};
use feedstream_core::time::{CalendarInterval, Interval, TimeArg, Timestamp};

#[tokio::test]
async fn test_fixed_round_trip() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = fixed_feed(&t.feeds, 1, "power", 10).await;
    t.feeds.post(id, 1000, None, 1.5, None).await?;
    t.feeds.post(id, 1010, None, 2.5, None).await?;
    t.feeds.post(id, 1020, None, 3.5, None).await?;

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

    params.timeformat = "notime".to_string();
    let values = t.feeds.get_data(&params).await?;
    assert_eq!(values, FeedData::Values(vec![Some(1.5), Some(2.5), Some(3.5)]));
    assert_eq!(values.len(), data.len());
    Ok(())
}

#[tokio::test]
async fn test_request_validation() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = fixed_feed(&t.feeds, 1, "power", 10).await;

    let params = QueryParams::new(id, 2000, 1000, Interval::Seconds(10));
    let err = t.feeds.get_data(&params).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.message(), "Request end time before start time");

    let params = QueryParams::new(id, 0, 1_000_000, Interval::Seconds(10));
    let err = t.feeds.get_data(&params).await.unwrap_err();
    assert!(matches!(err, Error::LimitExceeded(_)));

    let mut params = QueryParams::new(id, 1000, 2000, Interval::Seconds(10));
    params.csv = true;
    assert!(t.feeds.get_data(&params).await.is_err());

    let params = QueryParams::new(99, 1000, 2000, Interval::Seconds(10));
    assert!(matches!(t.feeds.get_data(&params).await, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_auto_interval() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = fixed_feed(&t.feeds, 1, "auto", 10).await;
    let values: Vec<Option<f64>> = (0..801).map(|i| Some(i as f64)).collect();
    t.feeds.upload_fixed_interval(id, 1000, 10, &values).await?;

    let params = QueryParams::new(id, 1000, 9000, Interval::Seconds(0));
    let data = t.feeds.get_data(&params).await?;
    assert_eq!(data.len(), 801);
    assert_eq!(data.values()[800], Some(800.0));
    Ok(())
}

#[tokio::test]
async fn test_delta() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = fixed_feed(&t.feeds, 1, "energy", 10).await;
    t.feeds
        .upload_fixed_interval(id, 1000, 10, &[Some(1.0), Some(3.0), Some(6.0), Some(10.0)])
        .await?;

    let mut params = QueryParams::new(id, 1000, 1030, Interval::Seconds(10));
    params.delta = true;
    let data = t.feeds.get_data(&params).await?;
    // the end is extended by one interval, so every requested bucket gets a difference
    assert_eq!(data.values(), vec![Some(2.0), Some(3.0), Some(4.0), None]);
    Ok(())
}

#[tokio::test]
async fn test_skip_missing_and_rounding() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = variable_feed(&t.feeds, 1, "sparse").await;
    t.feeds.post_multiple(id, &[(1000, 1.25), (1030, 2.75)], None).await?;

    let mut params = QueryParams::new(id, 1000, 1030, Interval::Seconds(10));
    params.timeformat = "unix".to_string();
    assert_eq!(t.feeds.get_data(&params).await?.len(), 4);

    params.skip_missing = true;
    params.dp = 1;
    let data = t.feeds.get_data(&params).await?;
    assert_eq!(
        data,
        FeedData::Series(vec![(Timestamp::Seconds(1000), Some(1.3)), (Timestamp::Seconds(1030), Some(2.8))])
    );
    Ok(())
}

#[tokio::test]
async fn test_csv_streaming() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let a = fixed_feed(&t.feeds, 1, "a", 10).await;
    let b = fixed_feed(&t.feeds, 1, "b", 10).await;
    t.feeds.upload_fixed_interval(a, 1000, 10, &[Some(1.0), Some(2.0)]).await?;
    t.feeds.upload_fixed_interval(b, 1000, 10, &[Some(5.0), None]).await?;

    let mut params = QueryParams::new(a, 1000, 1010, Interval::Seconds(10));
    params.timeformat = "unix".to_string();
    let mut out = Vec::new();
    let rows = t.feeds.stream_csv(&params, &mut out).await?;
    assert_eq!(rows, 2);
    assert_eq!(String::from_utf8(out)?, "1000,1.00\n1010,2.00\n");

    let mut out = Vec::new();
    t.feeds.write_csv_multi(&[a, b], &params, &mut out).await?;
    let text = String::from_utf8(out)?;
    assert_eq!(text.lines().count(), 2);
    assert!(text.starts_with("1000,1.00,5.00"));
    Ok(())
}

#[tokio::test]
async fn test_time_of_day_needs_grid_or_table() -> anyhow::Result<()> {
    let t = test_feeds(settings(false));
    let id = variable_feed(&t.feeds, 1, "sparse").await;
    let err = t
        .feeds
        .get_data_dmy_time_of_day(
            id,
            &TimeArg::Epoch(0.0),
            &TimeArg::Epoch(86_400.0 * 3.0),
            Interval::Calendar(CalendarInterval::Daily),
            "UTC",
            "unix",
            &[0.0, 12.0],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    Ok(())
}

#[tokio::test]
async fn test_skip_missing_reads_buffer_after_last_disk_point() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let id = variable_feed(&t.feeds, 1, "sparse").await;
    t.feeds.post_multiple(id, &[(1000, 1.0), (1010, 2.0)], None).await?;
    // 1005 is older than the last disk sample and stays out of the read
    t.feeds.post(id, 1005, None, 9.0, None).await?;
    t.feeds.post(id, 1025, None, 3.0, None).await?;

    let mut params = QueryParams::new(id, 1000, 1030, Interval::Seconds(10));
    params.timeformat = "unix".to_string();
    params.skip_missing = true;
    let data = t.feeds.get_data(&params).await?;
    assert_eq!(
        data,
        FeedData::Series(vec![
            (Timestamp::Seconds(1000), Some(1.0)),
            (Timestamp::Seconds(1010), Some(2.0)),
            (Timestamp::Seconds(1025), Some(3.0)),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_relational_reads_append_buffered_samples() -> anyhow::Result<()> {
    let t = test_feeds(settings(true));
    let id = t
        .feeds
        .create(1, "test", "table", EngineKind::RelationalTable.id(), &EngineOptions::default(), "")
        .await?;
    t.feeds.post_multiple(id, &[(1000, 1.0), (1010, 2.0)], None).await?;
    t.feeds.post(id, 1025, None, 3.0, None).await?;
    assert_eq!(t.feeds.get_buffer_size(), 1);

    let mut params = QueryParams::new(id, 1000, 1020, Interval::Seconds(10));
    params.timeformat = "unix".to_string();
    let data = t.feeds.get_data(&params).await?;
    // no gap filling for tables: the buffered sample follows the disk grid
    assert_eq!(
        data,
        FeedData::Series(vec![
            (Timestamp::Seconds(1000), Some(1.0)),
            (Timestamp::Seconds(1010), Some(2.0)),
            (Timestamp::Seconds(1020), None),
            (Timestamp::Seconds(1025), Some(3.0)),
        ])
    );
    Ok(())
}
