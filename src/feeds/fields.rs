//! Field updates and process lists.

use super::Feeds;
use crate::error::{Error, Result};
use crate::models::{html_escape, is_valid_name, validate_unit, FeedField, FeedId, UserId};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

const ERROR_FOUND_PREFIX: &str = "process__error_found:0,";

/// Checks a process list before it is stored. The list itself is opaque to
/// the feed engine; only the validator's output is persisted.
#[async_trait]
pub trait ProcessListValidator: Send + Sync {
    async fn validate(&self, userid: UserId, feed: FeedId, list: &str, context: &str) -> Result<String>;
}

/// The user-editable fields of a feed. Absent fields are left unchanged.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FieldUpdate {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub unit: Option<String>,
    /// Anything numerically greater than zero (or `true`) makes a feed public
    pub public: Option<Value>,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map_or(false, |n| n > 0.0),
        Value::String(s) => s.trim().parse::<f64>().map_or(false, |n| n > 0.0),
        _ => false,
    }
}

impl FieldUpdate {
    /// Validates every present field and returns the updates to apply.
    fn into_fields(self) -> Result<Vec<FeedField>> {
        let mut fields = Vec::new();
        if let Some(name) = self.name {
            fields.push(FeedField::Name(html_escape(&name).trim().to_string()));
        }
        if let Some(tag) = self.tag {
            if !is_valid_name(&tag) {
                return Err(Error::Validation("invalid characters in feed tag".to_string()));
            }
            fields.push(FeedField::Tag(tag));
        }
        if let Some(unit) = self.unit {
            validate_unit(&unit).map_err(|msg| Error::Validation(msg.to_string()))?;
            fields.push(FeedField::Unit(unit));
        }
        if let Some(public) = self.public {
            fields.push(FeedField::Public(truthy(&public)));
        }
        Ok(fields)
    }
}

fn field_json(field: &FeedField) -> (&'static str, Value) {
    match field {
        FeedField::Name(v) => ("name", Value::from(v.clone())),
        FeedField::Tag(v) => ("tag", Value::from(v.clone())),
        FeedField::Unit(v) => ("unit", Value::from(v.clone())),
        FeedField::Public(v) => ("public", Value::from(*v)),
        FeedField::Size(v) => ("size", Value::from(*v)),
        FeedField::ProcessList(v) => ("processList", Value::from(v.clone())),
        FeedField::LastValue { time, .. } => ("time", Value::from(*time)),
    }
}

impl Feeds {
    /// Applies a JSON object of field updates. Returns the applied fields.
    pub async fn set_feed_fields(&self, id: FeedId, json: &str) -> Result<Map<String, Value>> {
        let update: FieldUpdate = serde_json::from_str(json)?;
        self.update_feed_fields(id, update).await
    }

    pub async fn update_feed_fields(&self, id: FeedId, update: FieldUpdate) -> Result<Map<String, Value>> {
        if !self.exist(id).await? {
            return Err(Error::feed_not_found());
        }
        let fields = update.into_fields()?;
        if fields.is_empty() || !self.write_fields(id, &fields).await? {
            return Err(Error::Validation("Field could not be updated".to_string()));
        }
        Ok(fields
            .iter()
            .map(|field| {
                let (key, value) = field_json(field);
                (key.to_string(), value)
            })
            .collect())
    }

    pub async fn get_processlist(&self, id: FeedId) -> Result<String> {
        let record = self.load_record(id).await?.ok_or_else(Error::feed_not_found)?;
        Ok(record.process_list)
    }

    /// Stores the validator's rendition of `list`.
    pub async fn set_processlist(
        &self,
        userid: UserId,
        id: FeedId,
        list: &str,
        validator: &dyn ProcessListValidator,
    ) -> Result<String> {
        if !self.exist(id).await? {
            return Err(Error::feed_not_found());
        }
        let validated = validator.validate(userid, id, list, "feed").await?;
        if !self.write_fields(id, &[FeedField::ProcessList(validated.clone())]).await? {
            return Err(Error::Backend("Feed processlist was not updated".to_string()));
        }
        Ok(validated)
    }

    /// Marks a non-empty process list as having failed evaluation.
    pub async fn set_processlist_error_found(&self, id: FeedId) -> Result<()> {
        let current = self.get_processlist(id).await?;
        if current.is_empty() || current.starts_with(ERROR_FOUND_PREFIX) {
            return Ok(());
        }
        let marked = format!("{}{}", ERROR_FOUND_PREFIX, current);
        self.write_fields(id, &[FeedField::ProcessList(marked)]).await?;
        Ok(())
    }

    pub async fn reset_processlist(&self, id: FeedId) -> Result<()> {
        if !self.exist(id).await? {
            return Err(Error::feed_not_found());
        }
        self.write_fields(id, &[FeedField::ProcessList(String::new())]).await?;
        Ok(())
    }
}
