//! Wire shapes exchanged with the conversational agent.
//!
//! Incoming messages carry either transcript text or base64 audio, and a
//! `turnComplete` flag when the agent has finished a response. Outgoing
//! audio is wrapped in a realtime-input envelope tagged with its PCM rate.

use crate::audio::chunk::EncodedChunk;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
}

/// One message as the agent sends it. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ServerMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn parts(&self) -> &[Part] {
        self.server_content
            .as_ref()
            .and_then(|content| content.model_turn.as_ref())
            .map(|turn| turn.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Flattens the message into what the pipeline cares about.
    ///
    /// Top-level `text`/`data` win over model-turn parts; within the parts the
    /// first non-empty entry is used. The setup handshake yields nothing.
    pub fn parse(&self) -> ParsedServerMessage {
        if self.setup_complete.as_ref().is_some_and(|v| !v.is_null()) {
            return ParsedServerMessage::default();
        }

        let turn_complete = self
            .server_content
            .as_ref()
            .is_some_and(|content| content.turn_complete);

        let text = non_empty(self.text.as_deref()).or_else(|| {
            self.parts()
                .iter()
                .find_map(|part| non_empty(part.text.as_deref()))
        });

        let audio_data = non_empty(self.data.as_deref()).or_else(|| {
            self.parts().iter().find_map(|part| {
                part.inline_data
                    .as_ref()
                    .and_then(|inline| non_empty(Some(&inline.data)))
            })
        });

        ParsedServerMessage {
            text,
            audio_data,
            turn_complete,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

/// The parts of a server message the pipeline acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedServerMessage {
    pub text: Option<String>,
    /// Base64 16-bit PCM at the playback rate.
    pub audio_data: Option<String>,
    pub turn_complete: bool,
}

/// Parses an already-decoded JSON value.
///
/// # Errors
/// `VoxlinkError::Json` when the value is not an object of the expected shape.
pub fn parse_server_message(value: &Value) -> Result<ParsedServerMessage> {
    let message: ServerMessage = serde_json::from_value(value.clone())?;
    Ok(message.parse())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBlob {
    pub data: String,
    pub mime_type: String,
}

/// Outgoing realtime audio envelope: `{"audio": {"data", "mimeType"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub audio: AudioBlob,
}

impl RealtimeInput {
    pub fn audio(chunk: &EncodedChunk) -> Self {
        Self {
            audio: AudioBlob {
                data: chunk.data.clone(),
                mime_type: chunk.mime_type(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::chunk::AudioChunk;
    use crate::error::VoxlinkError;
    use serde_json::json;

    #[test]
    fn setup_complete_yields_nothing() {
        let parsed = parse_server_message(&json!({
            "setupComplete": {},
            "text": "ignored"
        }))
        .unwrap();
        assert_eq!(parsed, ParsedServerMessage::default());
    }

    #[test]
    fn top_level_fields_win() {
        let parsed = parse_server_message(&json!({
            "text": "hello",
            "data": "AAA=",
            "serverContent": {
                "modelTurn": { "parts": [
                    { "text": "other" },
                    { "inlineData": { "data": "BBB=", "mimeType": "audio/pcm;rate=24000" } }
                ]}
            }
        }))
        .unwrap();
        assert_eq!(parsed.text.as_deref(), Some("hello"));
        assert_eq!(parsed.audio_data.as_deref(), Some("AAA="));
        assert!(!parsed.turn_complete);
    }

    #[test]
    fn falls_back_to_first_matching_part() {
        let parsed = parse_server_message(&json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "data": "", "mimeType": "audio/pcm" } },
                    { "inlineData": { "data": "first", "mimeType": "audio/pcm" } },
                    { "text": "caption" },
                    { "inlineData": { "data": "second", "mimeType": "audio/pcm" } }
                ]}
            }
        }))
        .unwrap();
        assert_eq!(parsed.audio_data.as_deref(), Some("first"));
        assert_eq!(parsed.text.as_deref(), Some("caption"));
    }

    #[test]
    fn turn_complete_without_content() {
        let parsed =
            parse_server_message(&json!({ "serverContent": { "turnComplete": true } })).unwrap();
        assert!(parsed.turn_complete);
        assert!(parsed.audio_data.is_none());
        assert!(parsed.text.is_none());
    }

    #[test]
    fn inline_data_without_payload_keeps_turn_complete() {
        let parsed = parse_server_message(&json!({
            "serverContent": {
                "turnComplete": true,
                "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm" } } ] }
            }
        }))
        .unwrap();
        assert!(parsed.turn_complete);
        assert!(parsed.audio_data.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let parsed =
            parse_server_message(&json!({ "usageMetadata": { "totalTokenCount": 12 } })).unwrap();
        assert_eq!(parsed, ParsedServerMessage::default());
    }

    #[test]
    fn non_object_is_an_error() {
        let result = parse_server_message(&json!([1, 2, 3]));
        assert!(matches!(result, Err(VoxlinkError::Json(_))));
    }

    #[test]
    fn from_json_round_trips_through_parse() {
        let message = ServerMessage::from_json(r#"{"data":"AAA=","serverContent":{"turnComplete":true}}"#)
            .unwrap();
        let parsed = message.parse();
        assert_eq!(parsed.audio_data.as_deref(), Some("AAA="));
        assert!(parsed.turn_complete);
    }

    #[test]
    fn realtime_input_shape() {
        let chunk = EncodedChunk::encode(0, &AudioChunk::new(vec![1.0, -1.0], 16_000));
        let json: Value = serde_json::from_str(&RealtimeInput::audio(&chunk).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({ "audio": { "data": "/38AgA==", "mimeType": "audio/pcm;rate=16000" } })
        );
    }
}
