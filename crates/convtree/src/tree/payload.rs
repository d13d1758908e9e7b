use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{Anomaly, AnomalyKind, ImageAsset, Role};

pub const TEXT: &str = "text";
pub const CODE: &str = "code";
pub const AUDIO_TRANSCRIPTION: &str = "audio_transcription";
pub const IMAGE_ASSET_POINTER: &str = "image_asset_pointer";
pub const MULTIMODAL_TEXT: &str = "multimodal_text";
pub const UNKNOWN: &str = "unknown";

/// Message content as a closed set of known kinds plus an open fallback that
/// keeps the raw tag and fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text {
        parts: Vec<String>,
    },
    Code {
        text: String,
        language: Option<String>,
    },
    AudioTranscription {
        text: String,
    },
    ImageAssetPointer {
        asset: ImageAsset,
    },
    /// Parts dispatched one by one; `tag` is the source tag, usually
    /// `multimodal_text` but also `text` when its parts hold objects.
    Multimodal {
        tag: String,
        parts: Vec<ContentPart>,
    },
    Unrecognized {
        tag: String,
        fields: Map<String, Value>,
    },
    /// The payload carried no `content` object at all.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    AudioTranscription { text: String },
    Image { asset: ImageAsset },
    Unrecognized { tag: String, fields: Map<String, Value> },
}

impl Content {
    #[must_use]
    pub fn content_type(&self) -> &str {
        match self {
            Self::Text { .. } => TEXT,
            Self::Code { .. } => CODE,
            Self::AudioTranscription { .. } => AUDIO_TRANSCRIPTION,
            Self::ImageAssetPointer { .. } => IMAGE_ASSET_POINTER,
            Self::Multimodal { tag, .. } => tag,
            Self::Unrecognized { tag, .. } => tag,
            Self::Missing => UNKNOWN,
        }
    }

    /// Tags this content carries that no renderer understands, including
    /// those nested inside multimodal parts.
    #[must_use]
    pub fn unrecognized_tags(&self) -> Vec<&str> {
        match self {
            Self::Unrecognized { tag, .. } => vec![tag.as_str()],
            Self::Multimodal { parts, .. } => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Unrecognized { tag, .. } => Some(tag.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn from_object(content: &Map<String, Value>) -> Self {
        let tag = string_field(content, &["content_type", "contentType"]);
        match tag.as_deref() {
            Some(TEXT) => text_or_multimodal(content),
            Some(CODE) => Self::Code {
                text: string_field(content, &["text"]).unwrap_or_default(),
                language: string_field(content, &["language"]),
            },
            Some(AUDIO_TRANSCRIPTION) => Self::AudioTranscription {
                text: string_field(content, &["text"])
                    .unwrap_or_else(|| string_parts(content).concat()),
            },
            Some(IMAGE_ASSET_POINTER) => Self::ImageAssetPointer {
                asset: image_asset(content),
            },
            Some(MULTIMODAL_TEXT) => Self::Multimodal {
                tag: MULTIMODAL_TEXT.to_string(),
                parts: content_parts(content),
            },
            Some(other) => Self::Unrecognized {
                tag: other.to_string(),
                fields: without_tag(content),
            },
            None if content.contains_key("parts") => text_or_multimodal(content),
            None => match string_field(content, &["text"]) {
                Some(text) => Self::Text { parts: vec![text] },
                None => Self::Unrecognized {
                    tag: UNKNOWN.to_string(),
                    fields: without_tag(content),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePayload {
    pub role: Role,

    /// `author.role` as written, kept when it did not map onto [`Role`].
    pub raw_role: Option<String>,
    pub author_name: Option<String>,

    /// Cocoa seconds.
    pub create_time: Option<f64>,
    pub content: Content,
    pub image_title: Option<String>,
}

impl MessagePayload {
    pub(crate) fn from_object(
        node_id: &str,
        message: &Map<String, Value>,
        anomalies: &mut Vec<Anomaly>,
    ) -> Self {
        let author = message.get("author").and_then(Value::as_object);
        let content = message.get("content").and_then(Value::as_object);

        let mut missing = Vec::new();
        if author.is_none() {
            missing.push("author");
        }
        if content.is_none() {
            missing.push("content");
        }
        if !missing.is_empty() {
            anomalies.push(Anomaly::at(
                AnomalyKind::IncompletePayload,
                node_id,
                format!(
                    "message payload is missing {}; retained with unknown values",
                    missing.join(" and ")
                ),
            ));
        }

        let raw_role = author.and_then(|author| string_field(author, &["role"]));
        let role = match raw_role.as_deref() {
            Some(raw) => Role::from_author_role(raw).unwrap_or_else(|| {
                anomalies.push(Anomaly::at(
                    AnomalyKind::UnrecognizedRole,
                    node_id,
                    format!("author role `{raw}` is not a known role"),
                ));
                Role::Unknown
            }),
            None => Role::Unknown,
        };
        let raw_role = raw_role.filter(|raw| Role::from_author_role(raw).is_none());

        Self {
            role,
            raw_role,
            author_name: author.and_then(|author| string_field(author, &["name"])),
            create_time: number_field(message, &["createTime", "create_time"]),
            content: content.map_or(Content::Missing, Content::from_object),
            image_title: message
                .get("metadata")
                .and_then(Value::as_object)
                .and_then(|metadata| string_field(metadata, &["image_gen_title"])),
        }
    }
}

fn text_or_multimodal(content: &Map<String, Value>) -> Content {
    let has_structured_parts = content
        .get("parts")
        .and_then(Value::as_array)
        .is_some_and(|parts| parts.iter().any(Value::is_object));
    if has_structured_parts {
        return Content::Multimodal {
            tag: TEXT.to_string(),
            parts: content_parts(content),
        };
    }

    let parts = string_parts(content);
    if parts.is_empty()
        && let Some(text) = string_field(content, &["text"])
    {
        return Content::Text { parts: vec![text] };
    }
    Content::Text { parts }
}

fn string_parts(content: &Map<String, Value>) -> Vec<String> {
    content
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn content_parts(content: &Map<String, Value>) -> Vec<ContentPart> {
    let Some(parts) = content.get("parts").and_then(Value::as_array) else {
        return Vec::new();
    };

    parts
        .iter()
        .filter_map(|part| match part {
            Value::Null => None,
            Value::String(text) => Some(ContentPart::Text { text: text.clone() }),
            Value::Object(object) => Some(content_part(object)),
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other.clone());
                Some(ContentPart::Unrecognized {
                    tag: "scalar".to_string(),
                    fields,
                })
            }
        })
        .collect()
}

fn content_part(part: &Map<String, Value>) -> ContentPart {
    match string_field(part, &["content_type", "contentType"]).as_deref() {
        Some(TEXT) => ContentPart::Text {
            text: string_field(part, &["text"]).unwrap_or_default(),
        },
        Some(AUDIO_TRANSCRIPTION) => ContentPart::AudioTranscription {
            text: string_field(part, &["text"]).unwrap_or_default(),
        },
        Some(IMAGE_ASSET_POINTER) => ContentPart::Image {
            asset: image_asset(part),
        },
        Some(other) => ContentPart::Unrecognized {
            tag: other.to_string(),
            fields: without_tag(part),
        },
        None => match string_field(part, &["text"]) {
            Some(text) => ContentPart::Text { text },
            None => ContentPart::Unrecognized {
                tag: UNKNOWN.to_string(),
                fields: part.clone(),
            },
        },
    }
}

fn image_asset(object: &Map<String, Value>) -> ImageAsset {
    let metadata = object.get("metadata").and_then(Value::as_object);
    let generation_id = metadata
        .and_then(|metadata| {
            ["generation", "dalle"].iter().find_map(|key| {
                metadata
                    .get(*key)
                    .and_then(Value::as_object)
                    .and_then(|nested| string_field(nested, &["gen_id", "generation_id"]))
            })
        })
        .or_else(|| string_field(object, &["generation_id", "gen_id"]));

    ImageAsset {
        asset_pointer: string_field(object, &["asset_pointer", "assetPointer"]).unwrap_or_default(),
        width: unsigned_field(object, &["width"]),
        height: unsigned_field(object, &["height"]),
        size_bytes: unsigned_field(object, &["size_bytes", "sizeBytes"]),
        generation_id,
    }
}

fn without_tag(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter(|(key, _)| key.as_str() != "content_type" && key.as_str() != "contentType")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub(crate) fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(ToString::to_string)
}

pub(crate) fn number_field(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_f64))
}

fn unsigned_field(object: &Map<String, Value>, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| {
            let value = object.get(*key)?;
            value
                .as_u64()
                .or_else(|| value.as_f64().filter(|number| *number >= 0.0).map(|number| number as u64))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn content_of(value: Value) -> Content {
        let object = value.as_object().expect("fixture must be an object").clone();
        Content::from_object(&object)
    }

    #[test]
    fn text_parts_keep_their_order() {
        let content = content_of(json!({"content_type": "text", "parts": ["a", "b\n", "c"]}));
        assert_eq!(
            content,
            Content::Text {
                parts: vec!["a".to_string(), "b\n".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn text_with_structured_parts_keeps_its_tag() {
        let content = content_of(json!({
            "content_type": "text",
            "parts": [
                "see ",
                {"content_type": "image_asset_pointer", "asset_pointer": "file-service://img", "width": 4, "height": 3}
            ]
        }));

        assert_eq!(content.content_type(), "text");
        let Content::Multimodal { parts, .. } = content else {
            panic!("expected part-wise content");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], ContentPart::Image { asset } if asset.width == 4));
    }

    #[test]
    fn image_generation_id_is_read_from_metadata() {
        let content = content_of(json!({
            "content_type": "image_asset_pointer",
            "asset_pointer": "sediment://file_1",
            "size_bytes": 2048,
            "metadata": {"dalle": {"gen_id": "gen-7"}}
        }));

        let Content::ImageAssetPointer { asset } = content else {
            panic!("expected image content");
        };
        assert_eq!(asset.size_bytes, 2048);
        assert_eq!(asset.generation_id.as_deref(), Some("gen-7"));
        assert_eq!(asset.width, 0);
    }

    #[test]
    fn unknown_tags_keep_tag_and_fields() {
        let content = content_of(json!({"contentType": "widget_v2", "layout": {"rows": 2}}));

        assert_eq!(content.content_type(), "widget_v2");
        assert_eq!(content.unrecognized_tags(), vec!["widget_v2"]);
        let Content::Unrecognized { fields, .. } = content else {
            panic!("expected unrecognized content");
        };
        assert!(fields.contains_key("layout"));
        assert!(!fields.contains_key("contentType"));
    }

    #[test]
    fn payload_without_author_is_retained_with_unknown_role() {
        let mut anomalies = Vec::new();
        let message = json!({"content": {"content_type": "text", "parts": ["hi"]}});
        let payload = MessagePayload::from_object(
            "n1",
            message.as_object().expect("fixture must be an object"),
            &mut anomalies,
        );

        assert_eq!(payload.role, Role::Unknown);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::IncompletePayload);
        assert!(anomalies[0].detail.contains("author"));
    }

    #[test]
    fn unrecognized_roles_are_kept_raw() {
        let mut anomalies = Vec::new();
        let message = json!({"author": {"role": "critic"}, "content": {"content_type": "text", "parts": []}});
        let payload = MessagePayload::from_object(
            "n2",
            message.as_object().expect("fixture must be an object"),
            &mut anomalies,
        );

        assert_eq!(payload.role, Role::Unknown);
        assert_eq!(payload.raw_role.as_deref(), Some("critic"));
        assert_eq!(anomalies[0].kind, AnomalyKind::UnrecognizedRole);
    }
}
