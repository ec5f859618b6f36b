//! JSON line messages exchanged with the reader firmware.
//!
//! The firmware speaks one JSON object per line. Two shapes matter:
//! a status reply (`{"status":"online"}`) answering the healthcheck, and a
//! card message carrying a `uid` string. Lines are told apart only by which
//! of these fields they carry; any other fields are ignored.

use serde::{Deserialize, Serialize};

use super::config::{HEALTHCHECK_LINE, STATUS_ONLINE};

/// Healthcheck request sent to a candidate port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckRequest {
    pub healtcheck: u8,
}

impl HealthcheckRequest {
    /// The payload as transmitted, newline included.
    pub fn wire_bytes() -> &'static [u8] {
        HEALTHCHECK_LINE.as_bytes()
    }
}

/// Status reply emitted by the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReply {
    pub status: String,
}

impl StatusReply {
    pub fn is_online(&self) -> bool {
        self.status == STATUS_ONLINE
    }
}

/// Card presentation message emitted by the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UidMessage {
    pub uid: String,
}

/// Parse a status reply. Only lines that look like a JSON object are
/// considered at all.
pub fn parse_status_reply(line: &str) -> Option<StatusReply> {
    let line = line.trim();
    if !(line.starts_with('{') && line.ends_with('}')) {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Check whether `line` announces an online reader.
pub fn is_online_reply(line: &str) -> bool {
    parse_status_reply(line).is_some_and(|reply| reply.is_online())
}

/// Extract the card UID from a line, if it carries one.
pub fn parse_uid_line(line: &str) -> Option<String> {
    let message: UidMessage = serde_json::from_str(line.trim()).ok()?;
    if message.uid.is_empty() {
        return None;
    }
    Some(message.uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_healthcheck_bytes_are_exact() {
        assert_eq!(HealthcheckRequest::wire_bytes(), b"{\"healtcheck\": 1}\n");
    }

    #[test]
    fn test_healthcheck_bytes_decode_to_request() {
        let decoded: serde_json::Value =
            serde_json::from_slice(HealthcheckRequest::wire_bytes()).unwrap();
        assert_eq!(decoded, json!({"healtcheck": 1}));

        let typed: HealthcheckRequest =
            serde_json::from_slice(HealthcheckRequest::wire_bytes()).unwrap();
        assert_eq!(typed, HealthcheckRequest { healtcheck: 1 });
    }

    #[test]
    fn test_online_reply() {
        assert!(is_online_reply("{\"status\":\"online\"}"));
        assert!(is_online_reply("  {\"status\": \"online\", \"fw\": \"1.2\"}\r"));
    }

    #[test]
    fn test_non_qualifying_replies() {
        assert!(!is_online_reply(""));
        assert!(!is_online_reply("booting..."));
        assert!(!is_online_reply("{\"status\":\"offline\"}"));
        assert!(!is_online_reply("{\"state\":\"online\"}"));
        assert!(!is_online_reply("{\"status\":1}"));
        assert!(!is_online_reply("[\"status\",\"online\"]"));
        assert!(!is_online_reply("{\"status\":\"online\""));
    }

    #[test]
    fn test_parse_uid_line() {
        assert_eq!(parse_uid_line("{\"uid\":\"04A1B2C3\"}").as_deref(), Some("04A1B2C3"));
        assert_eq!(
            parse_uid_line("{\"uid\":\"04A1B2C3\",\"extra\":true}").as_deref(),
            Some("04A1B2C3")
        );
    }

    #[test]
    fn test_parse_uid_line_rejects_noise() {
        assert_eq!(parse_uid_line("RC522 ready"), None);
        assert_eq!(parse_uid_line("{\"status\":\"online\"}"), None);
        assert_eq!(parse_uid_line("{\"uid\":1234}"), None);
        assert_eq!(parse_uid_line("{\"uid\":\"\"}"), None);
    }

    #[test]
    fn test_line_with_both_fields_is_read_by_each_parser() {
        let line = "{\"status\":\"online\",\"uid\":\"DEADBEEF\"}";
        assert!(is_online_reply(line));
        assert_eq!(parse_uid_line(line).as_deref(), Some("DEADBEEF"));
    }
}
