use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("meme not found: {0}")]
    NotFound(MemeId),
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("storage failure: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct MemeId(pub i64);

impl MemeId {
    /// Parse a path segment into an id. Anything that is not a plain integer yields `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<i64>().ok().map(Self)
    }
}

impl Display for MemeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the Document.
///
/// Fields the model does not know about are kept in `extra` and written back
/// unchanged, after the known fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemeRecord {
    pub id: MemeId,
    pub name: String,
    pub image: String,
    pub likes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A partial [`MemeRecord`] as accepted by an update.
///
/// `url` is doubly optional: absent keeps the stored link, `null` clears it.
/// A supplied `id` is captured only so it never lands in `extra`; merges ignore it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MemePatch {
    #[serde(default, rename = "id")]
    pub supplied_id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub url: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.image.is_none()
            && self.likes.is_none()
            && self.url.is_none()
            && self.extra.is_empty()
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Combine `existing` with `patch`. Present patch fields win, absent ones are
/// retained, and the id always stays `existing.id`.
#[must_use]
pub fn merge_record(existing: &MemeRecord, patch: &MemePatch) -> MemeRecord {
    let mut extra = existing.extra.clone();
    for (key, value) in &patch.extra {
        extra.insert(key.clone(), value.clone());
    }

    MemeRecord {
        id: existing.id,
        name: patch.name.clone().unwrap_or_else(|| existing.name.clone()),
        image: patch.image.clone().unwrap_or_else(|| existing.image.clone()),
        likes: patch.likes.unwrap_or(existing.likes),
        url: match &patch.url {
            Some(url) => url.clone(),
            None => existing.url.clone(),
        },
        extra,
    }
}

/// First record with `id` in document order.
#[must_use]
pub fn find_record(records: &[MemeRecord], id: MemeId) -> Option<&MemeRecord> {
    records.iter().find(|record| record.id == id)
}

/// Parse the full text of a Document.
///
/// # Errors
/// Returns [`StoreError::MalformedDocument`] when the text is not JSON, is not
/// an array, or holds an entry that is not a meme record.
pub fn parse_document(raw: &str) -> Result<Vec<MemeRecord>, StoreError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| StoreError::MalformedDocument(format!("invalid JSON: {err}")))?;

    let Value::Array(entries) = value else {
        return Err(StoreError::MalformedDocument(format!(
            "expected an array of records, found {}",
            json_kind(&value)
        )));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry).map_err(|err| {
                StoreError::MalformedDocument(format!("record at index {index}: {err}"))
            })
        })
        .collect()
}

/// Render a Document as pretty JSON with two-space indentation.
///
/// # Errors
/// Returns [`StoreError::MalformedDocument`] if a record cannot be serialized.
pub fn render_document(records: &[MemeRecord]) -> Result<String, StoreError> {
    serde_json::to_string_pretty(records)
        .map_err(|err| StoreError::MalformedDocument(format!("failed to render document: {err}")))
}

/// Reject seed data that would break id uniqueness.
///
/// # Errors
/// Returns [`StoreError::InvalidSeed`] naming the first repeated id.
pub fn validate_unique_ids(records: &[MemeRecord]) -> Result<(), StoreError> {
    let mut seen = std::collections::BTreeSet::new();
    for record in records {
        if !seen.insert(record.id) {
            return Err(StoreError::InvalidSeed(format!("duplicate id {}", record.id)));
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn mk_record(id: i64, name: &str, likes: i64) -> MemeRecord {
        MemeRecord {
            id: MemeId(id),
            name: name.to_string(),
            image: format!("http://x/{}.png", name.to_lowercase()),
            likes,
            url: None,
            extra: Map::new(),
        }
    }

    fn patch_from(value: Value) -> MemePatch {
        serde_json::from_value(value).unwrap_or_else(|err| panic!("invalid patch fixture: {err}"))
    }

    #[test]
    fn merge_applies_present_fields_and_keeps_the_rest() {
        let existing = mk_record(1, "A", 5);
        let merged = merge_record(&existing, &patch_from(json!({"likes": 6})));

        assert_eq!(merged.likes, 6);
        assert_eq!(merged.name, "A");
        assert_eq!(merged.image, "http://x/a.png");
        assert_eq!(merged.url, None);
    }

    #[test]
    fn merge_pins_id_even_when_patch_supplies_another() {
        let existing = mk_record(7, "Drake", 40);
        let patch = patch_from(json!({"id": 99, "name": "Drake Hotline"}));
        assert_eq!(patch.supplied_id, Some(json!(99)));

        let merged = merge_record(&existing, &patch);
        assert_eq!(merged.id, MemeId(7));
        assert_eq!(merged.name, "Drake Hotline");
        assert!(!merged.extra.contains_key("id"));
    }

    #[test]
    fn url_absent_keeps_link_and_null_clears_it() {
        let mut existing = mk_record(2, "B", 1);
        existing.url = Some("https://knowyourmeme.com/b".to_string());

        let kept = merge_record(&existing, &patch_from(json!({"name": "B2"})));
        assert_eq!(kept.url.as_deref(), Some("https://knowyourmeme.com/b"));

        let cleared = merge_record(&existing, &patch_from(json!({"url": null})));
        assert_eq!(cleared.url, None);

        let replaced = merge_record(&existing, &patch_from(json!({"url": "https://x/c"})));
        assert_eq!(replaced.url.as_deref(), Some("https://x/c"));
    }

    #[test]
    fn unknown_fields_survive_parse_merge_and_render() -> Result<(), StoreError> {
        let raw = r#"[{"id":3,"name":"C","image":"http://x/c.png","likes":2,"tags":["cat"],"rank":1}]"#;
        let records = parse_document(raw)?;
        assert_eq!(records[0].extra.get("tags"), Some(&json!(["cat"])));

        let merged = merge_record(&records[0], &patch_from(json!({"rank": 4, "mood": "smug"})));
        assert_eq!(merged.extra.get("tags"), Some(&json!(["cat"])));
        assert_eq!(merged.extra.get("rank"), Some(&json!(4)));
        assert_eq!(merged.extra.get("mood"), Some(&json!("smug")));

        let rendered = render_document(&[merged])?;
        let reparsed: Value = serde_json::from_str(&rendered)
            .unwrap_or_else(|err| panic!("rendered document is not JSON: {err}"));
        assert_eq!(
            reparsed,
            json!([{
                "id": 3, "name": "C", "image": "http://x/c.png", "likes": 2,
                "tags": ["cat"], "rank": 4, "mood": "smug"
            }])
        );
        Ok(())
    }

    #[test]
    fn render_uses_two_space_indent_and_omits_absent_url() -> Result<(), StoreError> {
        let rendered = render_document(&[mk_record(1, "A", 5)])?;
        assert_eq!(
            rendered,
            "[\n  {\n    \"id\": 1,\n    \"name\": \"A\",\n    \"image\": \"http://x/a.png\",\n    \"likes\": 5\n  }\n]"
        );
        Ok(())
    }

    #[test]
    fn parse_rejects_non_array_documents() {
        let err = parse_document(r#"{"id":1}"#).err();
        assert!(
            matches!(&err, Some(StoreError::MalformedDocument(message)) if message.contains("object")),
            "unexpected result: {err:?}"
        );

        let err = parse_document("not json").err();
        assert!(matches!(err, Some(StoreError::MalformedDocument(_))));
    }

    #[test]
    fn parse_rejects_entries_missing_required_fields() {
        let err = parse_document(r#"[{"id":1,"name":"A","image":"http://x/a.png","likes":1},{"id":2}]"#)
            .err();
        assert!(
            matches!(&err, Some(StoreError::MalformedDocument(message)) if message.contains("index 1")),
            "unexpected result: {err:?}"
        );
    }

    #[test]
    fn find_record_prefers_first_match_on_duplicate_ids() {
        let records = vec![mk_record(1, "First", 1), mk_record(1, "Second", 2)];
        let found = find_record(&records, MemeId(1)).map(|record| record.name.as_str());
        assert_eq!(found, Some("First"));
        assert!(find_record(&records, MemeId(2)).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected_for_seeding() {
        let records = vec![mk_record(1, "A", 1), mk_record(2, "B", 1), mk_record(1, "C", 1)];
        assert!(matches!(validate_unique_ids(&records), Err(StoreError::InvalidSeed(_))));
        assert!(validate_unique_ids(&records[..2]).is_ok());
    }

    #[test]
    fn meme_id_parses_plain_integers_only() {
        assert_eq!(MemeId::parse("42"), Some(MemeId(42)));
        assert_eq!(MemeId::parse("-3"), Some(MemeId(-3)));
        assert_eq!(MemeId::parse("abc"), None);
        assert_eq!(MemeId::parse("4.5"), None);
    }

    fn record_strategy() -> impl Strategy<Value = MemeRecord> {
        (
            any::<i64>(),
            "[A-Za-z ]{0,12}",
            "[a-z]{1,8}",
            any::<i64>(),
            proptest::option::of("[a-z]{1,8}"),
        )
            .prop_map(|(id, name, image, likes, url)| MemeRecord {
                id: MemeId(id),
                name,
                image: format!("http://x/{image}.png"),
                likes,
                url: url.map(|slug| format!("https://knowyourmeme.com/{slug}")),
                extra: Map::new(),
            })
    }

    fn patch_strategy() -> impl Strategy<Value = MemePatch> {
        (
            proptest::option::of(any::<i64>()),
            proptest::option::of("[A-Za-z ]{0,12}"),
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(any::<i64>()),
            proptest::option::of(proptest::option::of("[a-z]{1,8}")),
        )
            .prop_map(|(id, name, image, likes, url)| MemePatch {
                supplied_id: id.map(Value::from),
                name,
                image,
                likes,
                url,
                extra: Map::new(),
            })
    }

    proptest! {
        #[test]
        fn property_merge_never_changes_id(existing in record_strategy(), patch in patch_strategy()) {
            let merged = merge_record(&existing, &patch);
            prop_assert_eq!(merged.id, existing.id);
        }
    }

    proptest! {
        #[test]
        fn property_merge_takes_present_fields_and_retains_absent_ones(
            existing in record_strategy(),
            patch in patch_strategy(),
        ) {
            let merged = merge_record(&existing, &patch);

            prop_assert_eq!(&merged.name, patch.name.as_ref().unwrap_or(&existing.name));
            prop_assert_eq!(&merged.image, patch.image.as_ref().unwrap_or(&existing.image));
            prop_assert_eq!(merged.likes, patch.likes.unwrap_or(existing.likes));
            match &patch.url {
                Some(url) => prop_assert_eq!(&merged.url, url),
                None => prop_assert_eq!(&merged.url, &existing.url),
            }
            prop_assert_eq!(&merged.extra, &existing.extra);
        }
    }
}
