use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::models::ImageAsset;
use crate::tree::{Content, ContentPart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub content_type: String,
    pub text: String,
    pub assets: Vec<ImageAsset>,
}

pub fn render_content(content: &Content) -> RenderedContent {
    let mut assets = Vec::new();
    let text = match content {
        Content::Text { parts } => parts.concat(),
        Content::Code { text, .. } | Content::AudioTranscription { text } => text.clone(),
        Content::ImageAssetPointer { asset } => {
            assets.push(asset.clone());
            image_summary(asset)
        }
        Content::Multimodal { parts, .. } => render_parts(parts, &mut assets),
        Content::Unrecognized { tag, fields } => unrecognized_summary(tag, fields),
        Content::Missing => String::new(),
    };

    RenderedContent {
        content_type: content.content_type().to_string(),
        text,
        assets,
    }
}

/// Text-like parts run together; non-text parts sit on their own line.
fn render_parts(parts: &[ContentPart], assets: &mut Vec<ImageAsset>) -> String {
    let mut rendered = String::new();
    let mut after_block = false;
    for part in parts {
        match part {
            ContentPart::Text { text } | ContentPart::AudioTranscription { text } => {
                if text.is_empty() {
                    continue;
                }
                if after_block {
                    rendered.push('\n');
                }
                rendered.push_str(text);
                after_block = false;
            }
            ContentPart::Image { asset } => {
                push_block(&mut rendered, &image_summary(asset));
                assets.push(asset.clone());
                after_block = true;
            }
            ContentPart::Unrecognized { tag, fields } => {
                push_block(&mut rendered, &unrecognized_summary(tag, fields));
                after_block = true;
            }
        }
    }
    rendered
}

fn push_block(rendered: &mut String, block: &str) {
    if !rendered.is_empty() && !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered.push_str(block);
}

#[must_use]
pub fn image_summary(asset: &ImageAsset) -> String {
    let mut summary = format!(
        "[image asset_pointer={} width={} height={} size_bytes={}",
        asset.asset_pointer, asset.width, asset.height, asset.size_bytes
    );
    if let Some(generation_id) = &asset.generation_id {
        summary.push_str(" generation_id=");
        summary.push_str(generation_id);
    }
    summary.push(']');
    summary
}

/// `[tag] {fields}` with top-level keys sorted, so the same payload always
/// renders the same way.
#[must_use]
pub fn unrecognized_summary(tag: &str, fields: &Map<String, Value>) -> String {
    if fields.is_empty() {
        return format!("[{tag}]");
    }
    let sorted: BTreeMap<&String, &Value> = fields.iter().collect();
    let serialized = serde_json::to_string(&sorted).unwrap_or_default();
    format!("[{tag}] {serialized}")
}
