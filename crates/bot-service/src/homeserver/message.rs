//! Outgoing chat messages.

use super::RoomEvent;
use common::types::RoomId;
use serde_json::{json, Map, Value};

/// A chat message to send: plain, formatted, or a reply to a prior event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub formatted_body: Option<String>,
    pub in_reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            formatted_body: None,
            in_reply_to: None,
        }
    }

    /// Plain body plus an HTML rendering.
    pub fn formatted(body: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            formatted_body: Some(html.into()),
            in_reply_to: None,
        }
    }

    /// Reply to `original`, quoting it in both the plain and HTML bodies.
    #[must_use]
    pub fn reply(room_id: &RoomId, original: &RoomEvent, text: &str) -> Self {
        let original_body = original.message_body().unwrap_or_default();

        let quoted: Vec<String> = original_body
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    format!("> <{}> {line}", original.sender)
                } else {
                    format!("> {line}")
                }
            })
            .collect();
        let body = if quoted.is_empty() {
            format!("> <{}>\n\n{text}", original.sender)
        } else {
            format!("{}\n\n{text}", quoted.join("\n"))
        };

        let html = format!(
            "<mx-reply><blockquote><a href=\"https://matrix.to/#/{room}/{event}\">In reply to</a> \
             <a href=\"https://matrix.to/#/{sender}\">{sender}</a><br>{quoted}</blockquote></mx-reply>{reply}",
            room = room_id,
            event = original.event_id,
            sender = escape_html(&original.sender),
            quoted = escape_html(original_body),
            reply = escape_html(text),
        );

        Self {
            body,
            formatted_body: Some(html),
            in_reply_to: Some(original.event_id.clone()),
        }
    }

    /// Event content for `m.room.message`.
    #[must_use]
    pub fn to_content(&self) -> Value {
        let mut content = Map::new();
        content.insert("msgtype".to_string(), json!("m.text"));
        content.insert("body".to_string(), json!(self.body));

        if let Some(html) = &self.formatted_body {
            content.insert("format".to_string(), json!("org.matrix.custom.html"));
            content.insert("formatted_body".to_string(), json!(html));
        }

        if let Some(event_id) = &self.in_reply_to {
            content.insert(
                "m.relates_to".to_string(),
                json!({"m.in_reply_to": {"event_id": event_id}}),
            );
        }

        Value::Object(content)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn original() -> RoomEvent {
        RoomEvent {
            event_type: "m.room.message".to_string(),
            sender: "@alice:example.org".to_string(),
            event_id: "$orig".to_string(),
            state_key: None,
            content: json!({"msgtype": "m.text", "body": "!play song.ogg\nplease"}),
        }
    }

    #[test]
    fn test_plain_content() {
        let content = OutgoingMessage::plain("pong").to_content();
        assert_eq!(content, json!({"msgtype": "m.text", "body": "pong"}));
    }

    #[test]
    fn test_reply_quotes_original() {
        let room = RoomId::from("!r:example.org");
        let message = OutgoingMessage::reply(&room, &original(), "queued <1>");

        assert_eq!(
            message.body,
            "> <@alice:example.org> !play song.ogg\n> please\n\nqueued <1>"
        );

        let content = message.to_content();
        assert_eq!(content["m.relates_to"]["m.in_reply_to"]["event_id"], "$orig");
        assert_eq!(content["format"], "org.matrix.custom.html");

        let html = content["formatted_body"].as_str().unwrap();
        assert!(html.starts_with("<mx-reply><blockquote>"));
        assert!(html.contains("https://matrix.to/#/!r:example.org/$orig"));
        assert!(html.ends_with("queued &lt;1&gt;"));
    }
}
