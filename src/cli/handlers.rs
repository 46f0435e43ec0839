use super::commands::{
    Commands, CreateCommand, DataCommand, ExportCommand, FeedArg, ListCommand, PostCommand, SyncCommand,
};
use crate::config::ServiceConfig;
use crate::engine::EngineOptions;
use crate::error::{Error, Failure};
use crate::export;
use crate::feeds::Feeds;
use crate::models::{EngineKind, PaddingMode};
use crate::query::QueryParams;
use crate::time::{Interval, TimeArg};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::io::Write;
use tracing::info;

/// Runs one subcommand and prints its JSON result. Feed errors are printed
/// as a `{success: false, message}` failure before being returned.
pub async fn run(command: Commands, config: ServiceConfig) -> Result<()> {
    let result = dispatch(&config, command).await;
    match result {
        Ok(Value::Null) => Ok(()),
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            if let Some(err) = e.downcast_ref::<Error>() {
                println!("{}", serde_json::to_string(&Failure::from(err))?);
            }
            Err(e)
        }
    }
}

fn open(config: &ServiceConfig) -> Result<Feeds> {
    Feeds::from_config(config).context("Failed to open feed storage")
}

async fn dispatch(config: &ServiceConfig, command: Commands) -> Result<Value> {
    match command {
        Commands::Config => Ok(serde_json::to_value(config)?),
        Commands::Create(cmd) => handle_create(&open(config)?, cmd).await,
        Commands::Post(cmd) => handle_post(&open(config)?, cmd).await,
        Commands::Data(cmd) => handle_data(&open(config)?, cmd).await,
        Commands::Meta(FeedArg { feed }) => {
            let feeds = open(config)?;
            let record = feeds.get(feed).await?;
            let meta = feeds.get_meta(feed).await?;
            Ok(json!({ "feed": record, "meta": meta }))
        }
        Commands::List(cmd) => handle_list(&open(config)?, cmd).await,
        Commands::Sync(cmd) => handle_sync(&open(config)?, cmd).await,
        Commands::Export(cmd) => handle_export(&open(config)?, cmd).await,
        Commands::Delete(FeedArg { feed }) => {
            open(config)?.delete(feed).await?;
            Ok(json!({ "success": true }))
        }
    }
}

async fn handle_create(feeds: &Feeds, cmd: CreateCommand) -> Result<Value> {
    let kind = EngineKind::parse(&cmd.engine)
        .ok_or_else(|| Error::Validation(format!("ABORTED: Engine {} is not supported.", cmd.engine)))?;
    let options = EngineOptions {
        interval: cmd.interval,
        ..EngineOptions::default()
    };
    let id = feeds
        .create(cmd.user, &cmd.tag, &cmd.name, kind.id(), &options, &cmd.unit)
        .await?;
    info!("Created feed {} ({})", id, kind.name());
    Ok(json!({ "success": true, "feedid": id }))
}

async fn handle_post(feeds: &Feeds, cmd: PostCommand) -> Result<Value> {
    let padding = match cmd.padding.as_deref() {
        Some(mode) => Some(
            PaddingMode::parse(mode).ok_or_else(|| Error::Validation(format!("Invalid padding mode: {}", mode)))?,
        ),
        None => None,
    };

    if let Some(data) = cmd.data {
        let points: Vec<(i64, f64)> = serde_json::from_str(&data).map_err(Error::from)?;
        feeds.post_multiple(cmd.feed, &points, padding).await?;
        return Ok(json!({ "success": true, "count": points.len() }));
    }

    let value = cmd
        .value
        .ok_or_else(|| Error::Validation("Missing value".to_string()))?;
    let now = Utc::now().timestamp();
    let stored = feeds.post(cmd.feed, now, cmd.time, value, padding).await?;
    Ok(json!({ "success": true, "value": stored }))
}

async fn handle_data(feeds: &Feeds, cmd: DataCommand) -> Result<Value> {
    let params = QueryParams {
        feedid: cmd.feed,
        start: TimeArg::from(cmd.start.as_str()),
        end: TimeArg::from(cmd.end.as_str()),
        interval: Interval::parse(&cmd.interval)?,
        average: cmd.average,
        timezone: cmd.timezone,
        timeformat: cmd.timeformat,
        csv: cmd.csv,
        skip_missing: cmd.skip_missing,
        limit_interval: cmd.limit_interval,
        delta: cmd.delta,
        dp: cmd.dp,
    };

    if params.csv {
        let mut stdout = std::io::stdout();
        let rows = feeds.stream_csv(&params, &mut stdout).await?;
        stdout.flush()?;
        info!("Wrote {} CSV rows", rows);
        return Ok(Value::Null);
    }
    Ok(serde_json::to_value(feeds.get_data(&params).await?)?)
}

async fn handle_list(feeds: &Feeds, cmd: ListCommand) -> Result<Value> {
    let list = if cmd.public {
        feeds.get_user_public_feeds(cmd.user, cmd.meta).await?
    } else {
        feeds.get_user_feeds(cmd.user, cmd.meta).await?
    };
    Ok(serde_json::to_value(list)?)
}

async fn handle_sync(feeds: &Feeds, cmd: SyncCommand) -> Result<Value> {
    let blob = tokio::fs::read(&cmd.file)
        .await
        .with_context(|| format!("Failed to read {}", cmd.file.display()))?;
    let synced = feeds.sync(cmd.user, &blob).await?;
    Ok(json!({ "success": true, "updated": synced }))
}

async fn handle_export(feeds: &Feeds, cmd: ExportCommand) -> Result<Value> {
    match cmd.arrow {
        Some(path) => {
            let batch = feeds.export_arrow(cmd.feed, cmd.start).await?;
            let bytes = export::encode_record_batch(&batch)?;
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(json!({ "success": true, "rows": batch.num_rows(), "bytes": bytes.len() }))
        }
        None => Ok(serde_json::to_value(feeds.export(cmd.feed, cmd.start).await?)?),
    }
}
