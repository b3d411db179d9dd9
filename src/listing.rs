//! Record types for the listing queries.
//!
//! `show channels` / `show calls` answer in JSON (`as json`), decoded with
//! serde. `sofia status` answers as a text table routed through
//! [`parse_table`]; per-profile registration listings answer as `Key: value`
//! blocks with their own small parser here.

use crate::error::{EslError, EslResult};
use crate::table::{parse_table, TableOptions};
use serde::Deserialize;

/// Envelope around `show ... as json` responses.
///
/// An empty listing omits the `rows` key entirely, hence the default.
#[derive(Debug, Deserialize)]
struct ShowResponse<T> {
    #[allow(dead_code)]
    row_count: u64,
    #[serde(default)]
    rows: Vec<T>,
}

/// One active channel from `show channels as json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct Channel {
    /// Channel UUID.
    #[serde(default)]
    pub uuid: String,
    /// `inbound` or `outbound`.
    #[serde(default)]
    pub direction: String,
    /// Creation timestamp, switch-local.
    #[serde(default)]
    pub created: String,
    /// Channel name (e.g. `sofia/internal/1001@10.0.0.5`).
    #[serde(default)]
    pub name: String,
    /// Channel state (e.g. `CS_EXECUTE`).
    #[serde(default)]
    pub state: String,
    /// Caller ID name.
    #[serde(default)]
    pub cid_name: String,
    /// Caller ID number.
    #[serde(default)]
    pub cid_num: String,
    /// Dialed destination.
    #[serde(default)]
    pub dest: String,
    /// Currently executing application.
    #[serde(default)]
    pub application: String,
    /// Argument of the executing application.
    #[serde(default)]
    pub application_data: String,
    /// Call state (e.g. `ACTIVE`, `HELD`).
    #[serde(default)]
    pub callstate: String,
    /// UUID of the call this channel belongs to, if bridged.
    #[serde(default)]
    pub call_uuid: String,
}

/// One bridged call from `show calls as json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct Call {
    /// Call UUID (shared by both legs).
    #[serde(default)]
    pub call_uuid: String,
    /// Creation timestamp, switch-local.
    #[serde(default)]
    pub call_created: String,
    /// A-leg channel UUID.
    #[serde(default)]
    pub uuid: String,
    /// A-leg caller ID name.
    #[serde(default)]
    pub cid_name: String,
    /// A-leg caller ID number.
    #[serde(default)]
    pub cid_num: String,
    /// Dialed destination.
    #[serde(default)]
    pub dest: String,
    /// B-leg channel UUID.
    #[serde(default)]
    pub b_uuid: String,
    /// B-leg caller ID name.
    #[serde(default)]
    pub b_cid_name: String,
    /// B-leg caller ID number.
    #[serde(default)]
    pub b_cid_num: String,
}

/// One row from `sofia status`: a profile, gateway, or alias.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Profile {
    /// Entry name.
    pub name: String,
    /// Entry kind as reported by the switch: `profile`, `gateway`, `alias`.
    pub kind: String,
    /// Bind URI or target.
    pub data: String,
    /// Runtime state (e.g. `RUNNING (0)`).
    pub state: String,
}

/// One registration from `sofia status profile <name> reg`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Registration {
    /// SIP Call-ID of the REGISTER dialog.
    pub call_id: String,
    /// Registered identity (`user@realm`).
    pub user: String,
    /// Contact URI.
    pub contact: String,
    /// User agent string.
    pub agent: String,
    /// Registration status line.
    pub status: String,
    /// Ping status (`Reachable` / `Unreachable`), when OPTIONS pinging is on.
    pub ping_status: String,
    /// Network address the registration came from.
    pub network_ip: String,
    /// Network port the registration came from.
    pub network_port: String,
    /// The profile this registration belongs to (filled by the caller).
    pub profile: String,
}

/// Aggregate result of the per-profile registration sweep.
///
/// A profile whose fetch or parse failed contributes no users but is
/// recorded here instead of silently dropped, so the sweep always
/// completes and partial results remain usable.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct UserListing {
    /// All registrations across the queried profiles. Order within one
    /// profile matches the switch response; order across profiles follows
    /// the profile listing.
    pub users: Vec<Registration>,
    /// Profiles whose registration fetch failed, with the failure.
    pub failed_profiles: Vec<(String, EslError)>,
}

/// Decode a `show ... as json` body into its rows.
pub(crate) fn decode_show<T: for<'de> Deserialize<'de> + Default>(body: &str) -> EslResult<Vec<T>> {
    let response: ShowResponse<T> = serde_json::from_str(body)?;
    Ok(response.rows)
}

/// Parse `sofia status` output into profile entries.
///
/// The table carries `====` rule lines and one trailing summary line
/// (`2 profiles 1 gateway`); the summary parses as a record and is
/// stripped here per the caller-strips policy.
pub(crate) fn parse_profiles(raw: &str) -> Vec<Profile> {
    let options = TableOptions {
        comment_prefix: Some("="),
        ..TableOptions::default()
    };
    let mut records = parse_table(raw, &options);
    records.pop();

    records
        .into_iter()
        .map(|mut record| Profile {
            name: record
                .remove("Name")
                .unwrap_or_default(),
            kind: record
                .remove("Type")
                .unwrap_or_default(),
            data: record
                .remove("Data")
                .unwrap_or_default(),
            state: record
                .remove("State")
                .unwrap_or_default(),
        })
        .collect()
}

/// Parse `sofia status profile <name> reg` output.
///
/// Registrations arrive as `Key: value` blocks, one per registration,
/// each opened by a `Call-ID:` line. Lines outside a block (banner,
/// rule lines, the `Total items returned` trailer) are ignored.
pub(crate) fn parse_registrations(raw: &str, profile: &str) -> Vec<Registration> {
    let mut registrations = Vec::new();
    let mut current: Option<Registration> = None;

    for line in raw.lines() {
        let line = line.trim();

        if let Some(value) = line.strip_prefix("Call-ID:") {
            if let Some(done) = current.take() {
                registrations.push(done);
            }
            current = Some(Registration {
                call_id: value.trim().to_string(),
                profile: profile.to_string(),
                ..Registration::default()
            });
            continue;
        }

        let Some(reg) = current.as_mut() else {
            continue;
        };

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "User" => reg.user = value.to_string(),
            "Contact" => reg.contact = value.to_string(),
            "Agent" => reg.agent = value.to_string(),
            "Status" => reg.status = value.to_string(),
            "Ping-Status" => reg.ping_status = value.to_string(),
            "IP" => reg.network_ip = value.to_string(),
            "Port" => reg.network_port = value.to_string(),
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        registrations.push(done);
    }

    registrations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_show_channels() {
        let body = r#"{
            "row_count": 2,
            "rows": [
                {"uuid": "aaa", "direction": "inbound", "name": "sofia/internal/1001@10.0.0.5", "state": "CS_EXECUTE", "cid_num": "1001", "dest": "2000", "callstate": "ACTIVE"},
                {"uuid": "bbb", "direction": "outbound", "name": "sofia/internal/2000@10.0.0.5", "state": "CS_EXCHANGE_MEDIA", "cid_num": "1001", "dest": "2000", "callstate": "ACTIVE"}
            ]
        }"#;

        let channels: Vec<Channel> = decode_show(body).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].uuid, "aaa");
        assert_eq!(channels[1].direction, "outbound");
        assert_eq!(channels[0].application, "");
    }

    #[test]
    fn decode_show_empty_listing_has_no_rows_key() {
        let body = r#"{"row_count": 0}"#;
        let channels: Vec<Channel> = decode_show(body).unwrap();
        assert!(channels.is_empty());
    }

    #[test]
    fn decode_show_rejects_bad_json() {
        let result: EslResult<Vec<Channel>> = decode_show("-ERR not json");
        assert!(result.is_err());
    }

    #[test]
    fn decode_show_calls() {
        let body = r#"{
            "row_count": 1,
            "rows": [
                {"call_uuid": "c-1", "uuid": "aaa", "cid_num": "1001", "dest": "2000", "b_uuid": "bbb", "b_cid_num": "2000"}
            ]
        }"#;
        let calls: Vec<Call> = decode_show(body).unwrap();
        assert_eq!(calls[0].call_uuid, "c-1");
        assert_eq!(calls[0].b_uuid, "bbb");
    }

    #[test]
    fn parse_profiles_strips_summary() {
        let raw = "\
     Name       Type                              Data      State
===================================================================
 internal    profile     sip:mod_sofia@10.0.0.5:5060    RUNNING (0)
 external    profile     sip:mod_sofia@10.0.0.5:5080    RUNNING (0)
===================================================================
2 profiles 0 gateways
";
        let profiles = parse_profiles(raw);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "internal");
        assert_eq!(profiles[0].kind, "profile");
        assert_eq!(profiles[1].state, "RUNNING (0)");
    }

    #[test]
    fn parse_registrations_blocks() {
        let raw = "\
Registrations:
=================================================================================================
Call-ID:        abc-123@10.0.0.20
User:           1001@default
Contact:        \"Alice\" <sip:1001@10.0.0.20:5060>
Agent:          Linphone/5.0
Status:         Registered(UDP)(unknown) EXP(2026-01-01 12:00:00) EXPSECS(3600)
Ping-Status:    Reachable
IP:             10.0.0.20
Port:           5060

Call-ID:        def-456@10.0.0.21
User:           1002@default
Status:         Registered(UDP)
=================================================================================================
Total items returned: 2
";
        let regs = parse_registrations(raw, "internal");
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].call_id, "abc-123@10.0.0.20");
        assert_eq!(regs[0].user, "1001@default");
        assert_eq!(regs[0].contact, "\"Alice\" <sip:1001@10.0.0.20:5060>");
        assert_eq!(regs[0].ping_status, "Reachable");
        assert_eq!(regs[0].profile, "internal");
        assert_eq!(regs[1].user, "1002@default");
        assert_eq!(regs[1].contact, "");
    }

    #[test]
    fn parse_registrations_empty_listing() {
        let raw = "Registrations:\n================\nTotal items returned: 0\n";
        assert!(parse_registrations(raw, "internal").is_empty());
    }
}
