//! ESL protocol parsing and message handling

use crate::{
    buffer::EslBuffer,
    command::EslResponse,
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_TEXT_EVENT_JSON, CONTENT_TYPE_TEXT_EVENT_PLAIN, HEADER_CONTENT_LENGTH,
        HEADER_CONTENT_TYPE, HEADER_TERMINATOR, MAX_MESSAGE_SIZE,
    },
    error::{EslError, EslResult},
    event::{EslEvent, EventFormat},
};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// ESL message types
#[derive(Debug, Clone, PartialEq)]
pub enum MessageType {
    /// Authentication request from server
    AuthRequest,
    /// Command reply
    CommandReply,
    /// API response
    ApiResponse,
    /// Event message
    Event,
    /// Disconnect notice
    Disconnect,
    /// Unknown message type
    Unknown(String),
}

impl MessageType {
    /// Parse message type from Content-Type header
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            CONTENT_TYPE_AUTH_REQUEST => MessageType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => MessageType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => MessageType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN | CONTENT_TYPE_TEXT_EVENT_JSON | "log/data" => {
                MessageType::Event
            }
            "text/disconnect-notice" => MessageType::Disconnect,
            _ => MessageType::Unknown(content_type.to_string()),
        }
    }
}

/// Parsed ESL message
#[derive(Debug, Clone)]
pub struct EslMessage {
    /// Message type
    pub message_type: MessageType,
    /// Message headers
    pub headers: HashMap<String, String>,
    /// Message body (optional)
    pub body: Option<String>,
}

impl EslMessage {
    /// Create new message
    pub fn new(
        message_type: MessageType,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Self {
        Self {
            message_type,
            headers,
            body,
        }
    }

    /// Convert to EslResponse
    pub fn into_response(self) -> EslResponse {
        EslResponse::new(self.headers, self.body)
    }
}

/// Parser state for handling incomplete messages
#[derive(Debug)]
enum ParseState {
    WaitingForHeaders,
    WaitingForBody {
        message_type: MessageType,
        headers: HashMap<String, String>,
        body_length: usize,
    },
}

/// ESL protocol parser
pub struct EslParser {
    buffer: EslBuffer,
    state: ParseState,
}

impl EslParser {
    /// Create new parser
    pub fn new() -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: ParseState::WaitingForHeaders,
        }
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> EslResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// Try to parse a complete message from the buffer
    pub fn parse_message(&mut self) -> EslResult<Option<EslMessage>> {
        match &self.state {
            ParseState::WaitingForHeaders => {
                let terminator = HEADER_TERMINATOR.as_bytes();

                if let Some(headers_data) = self
                    .buffer
                    .extract_until_pattern(terminator)
                {
                    // Compact buffer to free consumed header data
                    self.buffer
                        .compact();

                    let headers_str = String::from_utf8(headers_data)
                        .map_err(|_| EslError::protocol_error("Invalid UTF-8 in headers"))?;

                    let headers = parse_header_lines(&headers_str)?;

                    // Every ESL message must have Content-Type. Missing means
                    // protocol desync (e.g. from a corrupted Content-Length).
                    let content_type = headers
                        .get(HEADER_CONTENT_TYPE)
                        .ok_or_else(|| {
                            EslError::protocol_error(
                                "Missing Content-Type header - likely protocol desync",
                            )
                        })?;
                    let message_type = MessageType::from_content_type(content_type);

                    if let Some(length_str) = headers.get(HEADER_CONTENT_LENGTH) {
                        let length: usize = length_str
                            .trim()
                            .parse()
                            .map_err(|_| EslError::InvalidHeader {
                                header: format!("Content-Length: {}", length_str),
                            })?;

                        if length > MAX_MESSAGE_SIZE {
                            return Err(EslError::protocol_error(format!(
                                "Message too large: Content-Length {} exceeds limit {}",
                                length, MAX_MESSAGE_SIZE
                            )));
                        }

                        if length > 0 {
                            self.state = ParseState::WaitingForBody {
                                message_type,
                                headers,
                                body_length: length,
                            };
                            // Body bytes may already be buffered
                            self.parse_message()
                        } else {
                            self.state = ParseState::WaitingForHeaders;
                            Ok(Some(EslMessage::new(message_type, headers, None)))
                        }
                    } else {
                        self.state = ParseState::WaitingForHeaders;
                        Ok(Some(EslMessage::new(message_type, headers, None)))
                    }
                } else {
                    Ok(None)
                }
            }
            ParseState::WaitingForBody {
                message_type,
                headers,
                body_length,
            } => {
                if let Some(body_data) = self
                    .buffer
                    .extract_bytes(*body_length)
                {
                    self.buffer
                        .compact();

                    let body_str = String::from_utf8(body_data)
                        .map_err(|_| EslError::protocol_error("Invalid UTF-8 in body"))?;

                    let message =
                        EslMessage::new(message_type.clone(), headers.clone(), Some(body_str));
                    self.state = ParseState::WaitingForHeaders;
                    Ok(Some(message))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Parse event from message, handling different formats
    pub fn parse_event(&self, message: EslMessage, format: EventFormat) -> EslResult<EslEvent> {
        match format {
            EventFormat::Plain => parse_plain_event(message),
            EventFormat::Json => parse_json_event(message),
        }
    }
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `Key: value` lines into a header map, percent-decoding values.
fn parse_header_lines(headers_str: &str) -> EslResult<HashMap<String, String>> {
    let mut headers = HashMap::new();

    for line in headers_str.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(colon_pos) = line.find(':') {
            let key = line[..colon_pos]
                .trim()
                .to_string();
            let raw_value = line[colon_pos + 1..].trim();
            let value = percent_decode_str(raw_value)
                .decode_utf8()
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw_value.to_string());
            headers.insert(key, value);
        } else {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        }
    }

    Ok(headers)
}

/// Parse plain text event
///
/// FreeSWITCH text/event-plain wire format uses a two-part structure:
/// - Outer envelope: Content-Length + Content-Type headers
/// - Body: URL-encoded key: value lines (the actual event headers)
///
/// If the event body itself contains a Content-Length, there's an inner
/// body after the event headers.
fn parse_plain_event(message: EslMessage) -> EslResult<EslEvent> {
    if message.message_type != MessageType::Event {
        return Err(EslError::protocol_error("Not an event message"));
    }

    let body = message
        .body
        .as_deref()
        .ok_or_else(|| EslError::protocol_error("Plain event missing body"))?;

    let mut event = EslEvent::new();

    // Event headers are terminated by \n\n; anything after is the inner body.
    let (header_section, inner_body) = if let Some(pos) = body.find("\n\n") {
        (&body[..pos], Some(&body[pos + 2..]))
    } else {
        (body, None)
    };

    for line in header_section.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(colon_pos) = line.find(':') {
            let key = line[..colon_pos]
                .trim()
                .to_string();
            let raw_value = line[colon_pos + 1..].trim();
            let value = percent_decode_str(raw_value)
                .decode_utf8()
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw_value.to_string());
            event.set_header(key, value);
        }
    }

    if let Some(ib) = inner_body {
        if !ib.is_empty() {
            event.set_body(ib.to_string());
        }
    }

    Ok(event)
}

/// Parse JSON event
fn parse_json_event(message: EslMessage) -> EslResult<EslEvent> {
    let body = message
        .body
        .ok_or_else(|| EslError::protocol_error("JSON event missing body"))?;

    let json_value: serde_json::Value = serde_json::from_str(&body)?;

    let mut event = EslEvent::new();

    if let Some(obj) = json_value.as_object() {
        for (key, value) in obj {
            let value_str = match value {
                serde_json::Value::String(s) => s.clone(),
                _ => value.to_string(),
            };
            // FreeSWITCH carries the event body as the "_body" key in JSON format
            if key == "_body" {
                event.set_body(value_str);
            } else {
                event.set_header(key.clone(), value_str);
            }
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_headers_basic() {
        let headers = parse_header_lines("Content-Type: auth/request\nContent-Length: 0").unwrap();

        assert_eq!(
            headers
                .get("Content-Type")
                .map(|s| s.as_str()),
            Some("auth/request")
        );
        assert_eq!(
            headers
                .get("Content-Length")
                .map(|s| s.as_str()),
            Some("0")
        );
    }

    #[test]
    fn parse_headers_percent_decoded() {
        let headers = parse_header_lines("Reply-Text: %2BOK%20accepted").unwrap();
        assert_eq!(
            headers
                .get("Reply-Text")
                .map(|s| s.as_str()),
            Some("+OK accepted")
        );
    }

    #[test]
    fn parse_headers_rejects_missing_colon() {
        assert!(parse_header_lines("not a header line").is_err());
    }

    #[test]
    fn parse_message_without_body() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: auth/request\n\n")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.message_type, MessageType::AuthRequest);
        assert!(message
            .body
            .is_none());
    }

    #[test]
    fn parse_message_with_body() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Length: 5\n\nhello")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.message_type, MessageType::ApiResponse);
        assert_eq!(
            message
                .body
                .as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn parse_message_split_across_reads() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Le")
            .unwrap();
        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());

        parser
            .add_data(b"ngth: 5\n\nhel")
            .unwrap();
        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());

        parser
            .add_data(b"lo")
            .unwrap();
        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(
            message
                .body
                .as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn parse_back_to_back_messages() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: command/reply\nReply-Text: +OK\n\nContent-Type: command/reply\nReply-Text: -ERR no\n\n")
            .unwrap();

        let first = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(first.message_type, MessageType::CommandReply);

        let second = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(
            second
                .headers
                .get("Reply-Text")
                .map(|s| s.as_str()),
            Some("-ERR no")
        );

        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());
    }

    #[test]
    fn parse_missing_content_type_is_error() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Reply-Text: +OK\n\n")
            .unwrap();
        assert!(parser
            .parse_message()
            .is_err());
    }

    #[test]
    fn parse_bad_content_length_is_error() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Length: banana\n\n")
            .unwrap();
        assert!(parser
            .parse_message()
            .is_err());
    }

    #[test]
    fn parse_plain_event_headers_and_body() {
        let body = "Event-Name: CHANNEL_CREATE\nUnique-ID: abc-123\nCaller-Caller-ID-Name: Alice%20Smith\n\ninner payload";
        let message = EslMessage::new(
            MessageType::Event,
            HashMap::new(),
            Some(body.to_string()),
        );

        let event = parse_plain_event(message).unwrap();
        assert_eq!(event.name(), Some("CHANNEL_CREATE"));
        assert_eq!(event.header("Unique-ID"), Some("abc-123"));
        assert_eq!(event.header("Caller-Caller-ID-Name"), Some("Alice Smith"));
        assert_eq!(event.body(), Some("inner payload"));
    }

    #[test]
    fn parse_json_event_headers() {
        let body = r#"{"Event-Name":"BACKGROUND_JOB","Job-UUID":"j-1","_body":"+OK done"}"#;
        let message = EslMessage::new(
            MessageType::Event,
            HashMap::new(),
            Some(body.to_string()),
        );

        let event = parse_json_event(message).unwrap();
        assert_eq!(event.name(), Some("BACKGROUND_JOB"));
        assert_eq!(event.header("Job-UUID"), Some("j-1"));
        assert_eq!(event.body(), Some("+OK done"));
    }

    #[test]
    fn parse_json_event_bad_json_is_error() {
        let message = EslMessage::new(
            MessageType::Event,
            HashMap::new(),
            Some("{not json".to_string()),
        );
        assert!(parse_json_event(message).is_err());
    }
}
