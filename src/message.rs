//! Wire message record exchanged over broker topics

use serde::{ Deserialize, Serialize };

/// One chat line in flight: the payload and the room it targets.
///
/// Encoded as JSON on broker topics. Field names are fixed by the wire
/// format shared with other server instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Line payload, without a trailing newline
    #[serde(rename = "Data")]
    pub data: String,
    /// Name of the room this message targets
    #[serde(rename = "Receiver")]
    pub receiver: String,
}

impl Message {
    /// Create a new message for the given room
    pub fn new(data: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            receiver: receiver.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new("hello", "roomA");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"Data":"hello","Receiver":"roomA"}"#);
    }

    #[test]
    fn test_round_trip() {
        let json = r#"{"Data":"hi there","Receiver":"lobby"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.data, "hi there");
        assert_eq!(msg.receiver, "lobby");
    }
}
