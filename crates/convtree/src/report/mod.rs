use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::device::DeviceInfo;
use crate::extract::ExtractStats;
use crate::models::{ConversationRecord, NormalizedMessage, Role, Transcript};
use crate::utils::content::{DEFAULT_EXCERPT_MAX_CHARS, derive_excerpt};
use crate::utils::time::format_unix_seconds;

const STYLE: &str = "body{font-family:-apple-system,Segoe UI,sans-serif;background:#0d1117;color:#c9d1d9;margin:0;padding:24px}\
h1{font-size:1.6em}table{border-collapse:collapse;margin-bottom:16px}td,th{border:1px solid #30363d;padding:4px 8px;text-align:left}\
details.conversation{border:1px solid #30363d;border-radius:6px;margin:12px 0;padding:8px 12px}\
summary{cursor:pointer;font-weight:600}.meta{color:#8b949e;font-size:.9em;margin:6px 0}\
.message{border-left:3px solid #30363d;margin:8px 0;padding:4px 10px}.message.user{border-color:#1f6feb}\
.message.assistant{border-color:#3fb950}.message.tool{border-color:#d29922}.message.system{border-color:#8b949e}\
.message-header{font-size:.85em;color:#8b949e}.message-content{white-space:pre-wrap}\
.anomalies{color:#f85149;font-size:.9em}\
.search-container{position:sticky;top:0;z-index:10;background:#161b22;border:1px solid #30363d;border-radius:8px;padding:12px;margin:16px 0}\
.search-input{width:100%;box-sizing:border-box;background:#0d1117;border:2px solid #30363d;border-radius:6px;padding:10px;color:#c9d1d9;font-size:16px}\
.search-input:focus{border-color:#58a6ff;outline:none}.search-stats{color:#8b949e;font-size:.9em;margin-top:6px}\
mark.highlight{background:#6e7681;color:#fff;font-weight:600;border-radius:2px;padding:0 2px}.message.hidden{display:none}";

const SEARCH_BOX: &str = "<div class=\"search-container\">\n\
<input type=\"search\" id=\"search-input\" class=\"search-input\" placeholder=\"Search messages...\" autocomplete=\"off\">\n\
<div class=\"search-stats\" id=\"search-stats\"></div>\n</div>\n";

/// Case-insensitive filter over message text and headers. Matches are
/// wrapped in `<mark>`; text is re-escaped before it goes back into the DOM.
const SEARCH_SCRIPT: &str = r#"<script>
function escapeHtml(text) {
  return text.replace(/&/g, '&amp;').replace(/</g, '&lt;').replace(/>/g, '&gt;');
}
function highlight(text, term) {
  const lower = text.toLowerCase();
  let out = '';
  let last = 0;
  let index = lower.indexOf(term);
  while (index !== -1) {
    out += escapeHtml(text.slice(last, index));
    out += '<mark class="highlight">' + escapeHtml(text.slice(index, index + term.length)) + '</mark>';
    last = index + term.length;
    index = lower.indexOf(term, last);
  }
  return out + escapeHtml(text.slice(last));
}
function searchMessages() {
  const term = document.getElementById('search-input').value.trim().toLowerCase();
  let matches = 0;
  let shown = 0;
  document.querySelectorAll('details.conversation').forEach(conversation => {
    let hit = false;
    conversation.querySelectorAll('.message').forEach(message => {
      const content = message.querySelector('.message-content');
      const text = content.dataset.original ?? content.textContent;
      content.dataset.original = text;
      if (!term) {
        content.textContent = text;
        message.classList.remove('hidden');
        return;
      }
      const header = message.querySelector('.message-header').textContent.toLowerCase();
      const found = text.toLowerCase().includes(term) || header.includes(term);
      message.classList.toggle('hidden', !found);
      content.innerHTML = found ? highlight(text, term) : escapeHtml(text);
      if (found) {
        hit = true;
        matches += 1;
      }
    });
    const visible = !term || hit;
    conversation.style.display = visible ? '' : 'none';
    conversation.querySelectorAll('details').forEach(nested => { nested.open = Boolean(term) && hit; });
    conversation.open = Boolean(term) && hit;
    if (visible) {
      shown += 1;
    }
  });
  document.getElementById('search-stats').textContent =
    term ? matches + ' matching messages in ' + shown + ' conversations' : '';
}
document.getElementById('search-input').addEventListener('input', searchMessages);
</script>
"#;

/// Conversations newest first by creation date; undated ones last, in input
/// order.
#[must_use]
pub fn order_for_report(records: &[ConversationRecord]) -> Vec<&ConversationRecord> {
    let mut ordered: Vec<&ConversationRecord> = records.iter().collect();
    ordered.sort_by(|left, right| {
        let left = left.metadata.creation_date.unwrap_or(f64::NEG_INFINITY);
        let right = right.metadata.creation_date.unwrap_or(f64::NEG_INFINITY);
        right.total_cmp(&left)
    });
    ordered
}

#[must_use]
pub fn render_report(
    records: &[ConversationRecord],
    stats: &ExtractStats,
    device: Option<&DeviceInfo>,
    generated_at_utc: &str,
) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Conversation Report</title>\n<style>");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body>\n<h1>Conversation Report</h1>\n");
    let _ = writeln!(
        html,
        "<p class=\"meta\">Generated {} &middot; {} conversations &middot; {} messages &middot; {} failed documents &middot; {} anomalies</p>",
        escape_html(generated_at_utc),
        stats.counts.documents_reconstructed,
        stats.counts.messages_emitted,
        stats.counts.documents_failed,
        stats.counts.anomalies
    );

    if let Some(device) = device {
        render_device(&mut html, device);
    }

    html.push_str(SEARCH_BOX);
    for (position, record) in order_for_report(records).into_iter().enumerate() {
        render_conversation(&mut html, position + 1, record);
    }

    html.push_str(SEARCH_SCRIPT);
    html.push_str("</body>\n</html>\n");
    html
}

fn render_device(html: &mut String, device: &DeviceInfo) {
    let rows = [
        ("Device ID", &device.device_id),
        ("Model", &device.device_model),
        ("Name", &device.device_name),
        ("Manufacturer", &device.manufacturer),
        ("Platform", &device.platform),
        ("OS version", &device.os_version),
        ("OS build", &device.os_build),
        ("Screen width", &device.screen_width),
        ("Screen height", &device.screen_height),
        ("App version", &device.app_version),
        ("App build", &device.app_build),
        ("App bundle", &device.app_bundle),
        ("Timezone", &device.timezone),
        ("Locale", &device.locale),
        ("User ID", &device.user_id),
    ];

    html.push_str("<h2>Device</h2>\n<table>\n");
    for (label, value) in rows {
        let _ = writeln!(
            html,
            "<tr><th>{label}</th><td>{}</td></tr>",
            escape_html(value.as_deref().unwrap_or("unknown"))
        );
    }
    html.push_str("</table>\n");
}

fn render_conversation(html: &mut String, position: usize, record: &ConversationRecord) {
    let title = record.title.as_deref().unwrap_or("Untitled Conversation");
    let _ = writeln!(
        html,
        "<details class=\"conversation\" id=\"conv-{position}\">\n<summary>{} ({} messages, {} prompts)</summary>",
        escape_html(title),
        record.message_count,
        record.user_message_count
    );
    let _ = writeln!(
        html,
        "<div class=\"meta\">File: {} &middot; ID: {} &middot; Created: {} &middot; Modified: {} &middot; Model: {} &middot; Archived: {}</div>",
        escape_html(&record.source_path),
        escape_html(&record.conversation_id),
        format_date(record.metadata.creation_date),
        format_date(record.metadata.modification_date),
        escape_html(record.metadata.model.as_deref().unwrap_or("unknown")),
        if record.metadata.is_archived == Some(true) { "yes" } else { "no" }
    );
    if let Some(prompt) = first_prompt_excerpt(record) {
        let _ = writeln!(html, "<div class=\"meta\">First prompt: {}</div>", escape_html(&prompt));
    }
    if let Some(hash) = &record.source_sha256 {
        let _ = writeln!(html, "<div class=\"meta\">Source {}</div>", escape_html(hash));
    }

    render_transcript(html, &record.primary);
    for (index, transcript) in record.secondary.iter().enumerate() {
        let _ = writeln!(html, "<h4>Disconnected thread {}</h4>", index + 1);
        render_transcript(html, transcript);
    }
    for alternate in &record.alternates {
        let _ = writeln!(
            html,
            "<details><summary>Alternate branch from {}</summary>",
            escape_html(&alternate.divergence_node_id)
        );
        render_transcript(html, &alternate.transcript);
        html.push_str("</details>\n");
    }

    if !record.anomalies.is_empty() {
        html.push_str("<ul class=\"anomalies\">\n");
        for anomaly in &record.anomalies {
            let _ = writeln!(
                html,
                "<li>{} {}: {}</li>",
                anomaly.kind.as_str(),
                escape_html(anomaly.node_id.as_deref().unwrap_or("-")),
                escape_html(&anomaly.detail)
            );
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</details>\n");
}

fn first_prompt_excerpt(record: &ConversationRecord) -> Option<String> {
    record
        .primary
        .messages
        .iter()
        .find(|message| message.role == Role::User)
        .and_then(|message| derive_excerpt(&message.rendered_content, DEFAULT_EXCERPT_MAX_CHARS))
}

fn render_transcript(html: &mut String, transcript: &Transcript) {
    for message in &transcript.messages {
        render_message(html, message);
    }
}

fn render_message(html: &mut String, message: &NormalizedMessage) {
    let role = message.role.as_str();
    let _ = writeln!(
        html,
        "<div class=\"message {role}\">\n<div class=\"message-header\">#{} {role} &middot; {} &middot; {}</div>",
        message.sequence_index,
        message.timestamp_utc.as_deref().unwrap_or("unknown time"),
        escape_html(&message.content_type)
    );
    if let Some(title) = &message.image_title {
        let _ = writeln!(html, "<div class=\"meta\">Image: {}</div>", escape_html(title));
    }
    let _ = writeln!(
        html,
        "<div class=\"message-content\">{}</div>\n</div>",
        escape_html(&message.rendered_content)
    );
}

fn format_date(unix_seconds: Option<f64>) -> String {
    unix_seconds
        .and_then(format_unix_seconds)
        .unwrap_or_else(|| "unknown".to_string())
}

#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn write_report_artifact(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create report artifact directory: {}", parent.display())
        })?;
    }
    std::fs::write(path, html)
        .with_context(|| format!("failed to write report artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"x" & 'y'</b>"#),
            "&lt;b&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn report_carries_search_box_and_highlight_script() {
        let stats = crate::extract::build_extract_stats(&crate::extract::ExtractionRun::default());
        let html = render_report(&[], &stats, None, "2026-01-01T00:00:00Z");

        let search = html.find("id=\"search-input\"").expect("search input should render");
        let script = html.find("function searchMessages()").expect("search script should render");
        assert!(search < script);
        assert!(html.contains("<mark class=\"highlight\">"));
        assert!(html.contains("addEventListener('input', searchMessages)"));
        assert!(html.trim_end().ends_with("</script>\n</body>\n</html>"));
    }
}
