//! Server-Sent Events frame encoding for the hub
//!
//! Only `event`, `id` and `data` are written. Multi-line data becomes one
//! `data:` line per line, and every frame ends with a blank line.

/// One outgoing event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name, `None` for the default `message` type
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    /// Renders the message as a wire frame terminated by a blank line
    pub fn encode(&self) -> String {
        let mut frame = String::new();
        if let Some(id) = &self.id {
            frame.push_str(&format!("id: {id}\n"));
        }
        if let Some(event) = &self.event {
            frame.push_str(&format!("event: {event}\n"));
        }
        for line in self.data.split('\n') {
            frame.push_str(&format!("data: {line}\n"));
        }
        frame.push('\n');
        frame
    }
}
