//! Command wire format and response handling

use crate::{
    constants::{HEADER_JOB_UUID, HEADER_REPLY_TEXT, HEADER_TERMINATOR},
    error::{EslError, EslResult},
};
use std::collections::HashMap;
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// ESL commands are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol commands.
pub(crate) fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::ProtocolError {
            message: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

/// Reply-Text classification per the ESL wire protocol.
///
/// FreeSWITCH commands return `+OK ...` on success and `-ERR ...` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Reply-Text starts with `+OK` or is absent/empty.
    Ok,
    /// Reply-Text starts with `-ERR`.
    Err,
    /// Reply-Text present but matches neither `+OK` nor `-ERR`.
    Other,
}

/// Response from ESL command execution
#[derive(Debug, Clone, PartialEq)]
pub struct EslResponse {
    headers: HashMap<String, String>,
    body: Option<String>,
    status: ReplyStatus,
}

impl EslResponse {
    /// `ReplyStatus` is derived from the `Reply-Text` header.
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        let status = match headers
            .get(HEADER_REPLY_TEXT)
            .map(|s| s.as_str())
        {
            None | Some("") => ReplyStatus::Ok,
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            Some(_) => ReplyStatus::Other,
        };

        Self {
            headers,
            body,
            status,
        }
    }

    /// `true` if Reply-Text is `+OK` or absent.
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Classification of the `Reply-Text` header.
    pub fn reply_status(&self) -> ReplyStatus {
        self.status
    }

    /// Response body (the `api/response` payload).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Look up a response header by name.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All response headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Raw `Reply-Text` header value (e.g. `+OK`, `-ERR invalid command`).
    pub fn reply_text(&self) -> Option<&str> {
        self.headers
            .get(HEADER_REPLY_TEXT)
            .map(|s| s.as_str())
    }

    /// `Job-UUID` header from `bgapi` command replies.
    pub fn job_uuid(&self) -> Option<&str> {
        self.headers
            .get(HEADER_JOB_UUID)
            .map(|s| s.as_str())
    }

    /// Convert to result based on the Reply-Text classification.
    ///
    /// `command` names the operation for error reporting.
    pub fn into_result(self, command: &str) -> EslResult<Self> {
        match self.status {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err => {
                let reply_text = self
                    .reply_text()
                    .unwrap_or("-ERR")
                    .to_string();
                Err(EslError::command_failed(command, reply_text))
            }
            ReplyStatus::Other => {
                let reply_text = self
                    .reply_text()
                    .unwrap_or("")
                    .to_string();
                Err(EslError::UnexpectedReply { reply_text })
            }
        }
    }

    /// Extract an `api/response` body, treating a `-ERR` payload as failure.
    ///
    /// `api` results carry their outcome in the body rather than Reply-Text:
    /// listing commands return raw text or JSON, call-control commands return
    /// `+OK <uuid>` or `-ERR <cause>`. Anything not marked `-ERR` is success.
    pub fn into_api_body(self, command: &str) -> EslResult<String> {
        let body = self
            .body
            .unwrap_or_default();
        if body
            .trim_start()
            .starts_with("-ERR")
        {
            return Err(EslError::command_failed(command, body.trim().to_string()));
        }
        Ok(body)
    }
}

/// ESL wire commands used by the session.
#[derive(Clone)]
pub enum EslCommand {
    /// Authenticate with password
    Auth { password: String },
    /// Execute API command, response delivered inline
    Api { command: String },
    /// Execute API command in the background, result delivered as a
    /// `BACKGROUND_JOB` event correlated by `Job-UUID`
    BgApi { command: String },
    /// Subscribe to events
    Events { format: String, events: String },
    /// Exit/logout
    Exit,
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Api { command } => f
                .debug_struct("Api")
                .field("command", command)
                .finish(),
            EslCommand::BgApi { command } => f
                .debug_struct("BgApi")
                .field("command", command)
                .finish(),
            EslCommand::Events { format, events } => f
                .debug_struct("Events")
                .field("format", format)
                .field("events", events)
                .finish(),
            EslCommand::Exit => write!(f, "Exit"),
        }
    }
}

impl EslCommand {
    /// Format a simple command with optional arguments
    fn format_simple_command(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result.push_str(HEADER_TERMINATOR);
        result
    }

    /// Validate all user-supplied fields, then convert to wire format.
    pub fn to_wire_format(&self) -> EslResult<String> {
        match self {
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command("auth", &[password]))
            }
            EslCommand::Api { command } => {
                validate_no_newlines(command, "api command")?;
                Ok(Self::format_simple_command("api", &[command]))
            }
            EslCommand::BgApi { command } => {
                validate_no_newlines(command, "bgapi command")?;
                Ok(Self::format_simple_command("bgapi", &[command]))
            }
            EslCommand::Events { format, events } => {
                validate_no_newlines(format, "event format")?;
                validate_no_newlines(events, "event list")?;
                Ok(Self::format_simple_command("event", &[format, events]))
            }
            EslCommand::Exit => Ok(Self::format_simple_command("exit", &[])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_wire_format() {
        let auth = EslCommand::Auth {
            password: "test".to_string(),
        };
        assert_eq!(
            auth.to_wire_format()
                .unwrap(),
            "auth test\n\n"
        );
    }

    #[test]
    fn api_wire_format() {
        let api = EslCommand::Api {
            command: "status".to_string(),
        };
        assert_eq!(
            api.to_wire_format()
                .unwrap(),
            "api status\n\n"
        );
    }

    #[test]
    fn bgapi_wire_format() {
        let cmd = EslCommand::BgApi {
            command: "originate user/1001 2000".to_string(),
        };
        assert_eq!(
            cmd.to_wire_format()
                .unwrap(),
            "bgapi originate user/1001 2000\n\n"
        );
    }

    #[test]
    fn events_wire_format() {
        let events = EslCommand::Events {
            format: "plain".to_string(),
            events: "CHANNEL_CREATE CHANNEL_DESTROY".to_string(),
        };
        assert_eq!(
            events
                .to_wire_format()
                .unwrap(),
            "event plain CHANNEL_CREATE CHANNEL_DESTROY\n\n"
        );
    }

    #[test]
    fn exit_wire_format() {
        assert_eq!(
            EslCommand::Exit
                .to_wire_format()
                .unwrap(),
            "exit\n\n"
        );
    }

    #[test]
    fn newline_injection_rejected() {
        let api = EslCommand::Api {
            command: "status\n\nevent plain ALL".to_string(),
        };
        assert!(api
            .to_wire_format()
            .is_err());

        let auth = EslCommand::Auth {
            password: "test\napi status".to_string(),
        };
        assert!(auth
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let auth = EslCommand::Auth {
            password: "secret".to_string(),
        };
        let debug_str = format!("{:?}", auth);
        assert!(!debug_str.contains("secret"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn reply_status_ok() {
        let headers: HashMap<String, String> =
            [("Reply-Text".into(), "+OK accepted".into())].into();
        let resp = EslResponse::new(headers, None);
        assert_eq!(resp.reply_status(), ReplyStatus::Ok);
        assert!(resp.is_success());
        assert!(resp
            .into_result("event")
            .is_ok());
    }

    #[test]
    fn reply_status_missing_header_is_ok() {
        let resp = EslResponse::new(HashMap::new(), None);
        assert_eq!(resp.reply_status(), ReplyStatus::Ok);
        assert!(resp.is_success());
    }

    #[test]
    fn reply_status_err_names_command() {
        let headers: HashMap<String, String> =
            [("Reply-Text".into(), "-ERR invalid command".into())].into();
        let resp = EslResponse::new(headers, None);
        assert_eq!(resp.reply_status(), ReplyStatus::Err);

        let err = resp
            .into_result("event")
            .unwrap_err();
        match err {
            EslError::CommandFailed {
                command,
                reply_text,
            } => {
                assert_eq!(command, "event");
                assert_eq!(reply_text, "-ERR invalid command");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn reply_status_other() {
        let headers: HashMap<String, String> =
            [("Reply-Text".into(), "something unexpected".into())].into();
        let resp = EslResponse::new(headers, None);
        assert_eq!(resp.reply_status(), ReplyStatus::Other);
        assert!(!resp.is_success());
    }

    #[test]
    fn api_body_success_passthrough() {
        let resp = EslResponse::new(HashMap::new(), Some("UP 0 years, 4 days".to_string()));
        assert_eq!(
            resp.into_api_body("status")
                .unwrap(),
            "UP 0 years, 4 days"
        );
    }

    #[test]
    fn api_body_err_marker_is_failure() {
        let resp = EslResponse::new(
            HashMap::new(),
            Some("-ERR USER_NOT_REGISTERED\n".to_string()),
        );
        let err = resp
            .into_api_body("originate")
            .unwrap_err();
        match err {
            EslError::CommandFailed {
                command,
                reply_text,
            } => {
                assert_eq!(command, "originate");
                assert_eq!(reply_text, "-ERR USER_NOT_REGISTERED");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn job_uuid_header() {
        let headers: HashMap<String, String> = [
            ("Reply-Text".into(), "+OK Job-UUID: j-1".into()),
            ("Job-UUID".into(), "j-1".into()),
        ]
        .into();
        let resp = EslResponse::new(headers, None);
        assert_eq!(resp.job_uuid(), Some("j-1"));
    }
}
