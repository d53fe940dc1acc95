use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::app::error::{ServiceError, ServiceResult, ValidationErrors};
use crate::app::feed::{invalidate_listings, post_cache_key};
use crate::domain::tag::Tag;
use crate::infra::cache::CacheLayer;
use crate::infra::store::{EntityStore, TAGS_NAME_KEY};

const TAG_NAME_MIN: usize = 2;
const TAG_NAME_MAX: usize = 20;
const NAME_TAKEN: &str = "The name has already been taken.";

fn id_list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+(,\d+)*$").expect("static tag id pattern"))
}

/// Normalizes the raw `tags` field of a request body.
///
/// Accepts an array of ids (numbers or digit strings), a string holding a
/// JSON array, a comma-separated digit string, or a single integer. `None`
/// means the field was absent or null. Duplicates collapse to their first
/// occurrence.
pub fn parse_tag_ids(raw: Option<&Value>) -> ServiceResult<Option<Vec<i64>>> {
    let ids = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => parse_items(items)?,
        Some(Value::String(text)) => parse_text(text)?,
        Some(Value::Number(number)) => match number.as_i64() {
            Some(id) => vec![id],
            None => return Err(not_an_array()),
        },
        Some(_) => return Err(not_an_array()),
    };
    Ok(Some(dedup(ids)))
}

fn parse_items(items: &[Value]) -> ServiceResult<Vec<i64>> {
    let mut errors = ValidationErrors::new();
    let mut ids = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let parsed = match item {
            Value::Number(number) => number.as_i64(),
            Value::String(text) if is_digits(text) => text.parse::<i64>().ok(),
            _ => None,
        };
        match parsed {
            Some(id) => ids.push(id),
            None => errors.add(
                format!("tags.{}", index),
                format!("The tags.{} field must be an integer.", index),
            ),
        }
    }
    errors.into_result()?;
    Ok(ids)
}

fn parse_text(text: &str) -> ServiceResult<Vec<i64>> {
    let text = text.trim();
    if text.starts_with('[') {
        return match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => parse_items(&items),
            _ => Err(not_an_array()),
        };
    }
    if !id_list_pattern().is_match(text) {
        return Err(not_an_array());
    }
    let mut ids = Vec::new();
    for (index, part) in text.split(',').enumerate() {
        let id = part.parse::<i64>().map_err(|_| {
            ServiceError::validation(
                format!("tags.{}", index),
                format!("The tags.{} field must be an integer.", index),
            )
        })?;
        ids.push(id);
    }
    Ok(ids)
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit())
}

fn dedup(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn not_an_array() -> ServiceError {
    ServiceError::validation("tags", "The tags field must be an array.")
}

/// Normalizes a boolean-ish request flag such as `append_tags`.
pub fn parse_flag(field: &str, raw: Option<&Value>) -> ServiceResult<bool> {
    let flag = match raw {
        None | Some(Value::Null) => Some(false),
        Some(Value::Bool(value)) => Some(*value),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" | "" => Some(false),
            _ => None,
        },
        Some(_) => None,
    };
    flag.ok_or_else(|| {
        ServiceError::validation(field, format!("The {} field must be true or false.", field))
    })
}

/// Reports every id in `tag_ids` that has no matching tag.
pub(crate) async fn ensure_tags_exist(
    store: &dyn EntityStore,
    tag_ids: &[i64],
) -> ServiceResult<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let existing: HashSet<i64> = store.existing_tag_ids(tag_ids).await?.into_iter().collect();
    let mut errors = ValidationErrors::new();
    for (index, id) in tag_ids.iter().enumerate() {
        if !existing.contains(id) {
            errors.add(
                format!("tags.{}", index),
                format!("The selected tags.{} is invalid.", index),
            );
        }
    }
    errors.into_result()
}

fn validate_name(name: Option<&str>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    match name.map(str::trim) {
        None | Some("") => errors.add("name", "The name field is required."),
        Some(name) => {
            let len = name.chars().count();
            if len < TAG_NAME_MIN {
                errors.add(
                    "name",
                    format!("The name field must be at least {} characters.", TAG_NAME_MIN),
                );
            } else if len > TAG_NAME_MAX {
                errors.add(
                    "name",
                    format!(
                        "The name field must not be greater than {} characters.",
                        TAG_NAME_MAX
                    ),
                );
            }
        }
    }
    errors
}

#[derive(Clone)]
pub struct TagService {
    store: Arc<dyn EntityStore>,
    cache: CacheLayer,
}

impl TagService {
    pub fn new(store: Arc<dyn EntityStore>, cache: CacheLayer) -> Self {
        Self { store, cache }
    }

    pub async fn create_tag(&self, name: Option<&str>) -> ServiceResult<Tag> {
        validate_name(name).into_result()?;
        let name = name.map(str::trim).unwrap_or_default();

        if self.store.tag_name_taken(name).await? {
            return Err(ServiceError::validation("name", NAME_TAKEN));
        }

        match self.store.insert_tag(name).await {
            Ok(tag) => Ok(tag),
            Err(err) if err.is_conflict_on(TAGS_NAME_KEY) => {
                Err(ServiceError::validation("name", NAME_TAKEN))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_tag(&self, tag_id: i64) -> ServiceResult<()> {
        let post_ids = self
            .store
            .delete_tag(tag_id)
            .await?
            .ok_or(ServiceError::NotFound("Tag not found."))?;

        for post_id in &post_ids {
            self.cache.forget(&post_cache_key(*post_id)).await;
        }
        invalidate_listings(&self.cache).await;
        tracing::info!(tag_id, affected_posts = post_ids.len(), "tag deleted");
        Ok(())
    }
}
