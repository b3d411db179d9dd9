//! Event subscription tracking.
//!
//! The session keeps the caller's desired event names here. The set is
//! de-duplicated but insertion-ordered, so the names sent to the transport
//! are deterministic. Whenever a ready-state change happens the transport
//! is sent the *entire* set: ESL `event` subscriptions are cumulative
//! switch-side, so re-sending the full set is always safe.

use crate::error::{EslError, EslResult};

/// Validate caller-supplied event names and collect them.
///
/// Event names are single wire tokens (`CHANNEL_CREATE`); whitespace would
/// smuggle extra names into the `event` command, so it is rejected outright
/// with no effect on the set. An empty collection is a valid no-op.
pub(crate) fn validate_event_names<I, S>(names: I) -> EslResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = Vec::new();
    for name in names {
        let name: String = name.into();
        if name.is_empty() {
            return Err(EslError::invalid_argument("event name must not be empty"));
        }
        if name
            .chars()
            .any(char::is_whitespace)
        {
            return Err(EslError::invalid_argument(format!(
                "event name '{}' must be a single token",
                name
            )));
        }
        out.push(name);
    }
    Ok(out)
}

/// Insertion-ordered, de-duplicated set of event names.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionSet {
    names: Vec<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one name. Returns whether the set changed.
    pub fn insert(&mut self, name: String) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.names
            .push(name);
        true
    }

    /// Union-merge a batch of names. Returns whether the set changed.
    pub fn merge(&mut self, names: impl IntoIterator<Item = String>) -> bool {
        let mut changed = false;
        for name in names {
            changed |= self.insert(name);
        }
        changed
    }

    /// Remove a batch of names. Absent names are ignored.
    pub fn remove_all(&mut self, names: &[String]) {
        self.names
            .retain(|existing| !names.contains(existing));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|existing| existing == name)
    }

    /// The tracked names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert("CHANNEL_CREATE".to_string()));
        assert!(!set.insert("CHANNEL_CREATE".to_string()));
        assert_eq!(set.names(), ["CHANNEL_CREATE"]);
    }

    #[test]
    fn merge_preserves_insertion_order() {
        let mut set = SubscriptionSet::new();
        set.merge([
            "CHANNEL_CREATE".to_string(),
            "CHANNEL_DESTROY".to_string(),
        ]);
        set.merge([
            "CHANNEL_DESTROY".to_string(),
            "HEARTBEAT".to_string(),
        ]);
        assert_eq!(
            set.names(),
            ["CHANNEL_CREATE", "CHANNEL_DESTROY", "HEARTBEAT"]
        );
    }

    #[test]
    fn merge_reports_change() {
        let mut set = SubscriptionSet::new();
        assert!(set.merge(["A".to_string()]));
        assert!(!set.merge(["A".to_string()]));
        assert!(set.merge(["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut set = SubscriptionSet::new();
        set.insert("CHANNEL_CREATE".to_string());
        set.remove_all(&["HEARTBEAT".to_string()]);
        assert_eq!(set.names(), ["CHANNEL_CREATE"]);

        set.remove_all(&["CHANNEL_CREATE".to_string()]);
        assert!(set
            .names()
            .is_empty());
    }

    #[test]
    fn validation_rejects_bad_names() {
        assert!(validate_event_names([""]).is_err());
        assert!(validate_event_names(["CHANNEL CREATE"]).is_err());
        assert!(validate_event_names(["CHANNEL_CREATE\nexit"]).is_err());

        let names = validate_event_names(["CHANNEL_CREATE", "HEARTBEAT"]).unwrap();
        assert_eq!(names, ["CHANNEL_CREATE", "HEARTBEAT"]);

        let empty: [&str; 0] = [];
        assert_eq!(validate_event_names(empty).unwrap(), Vec::<String>::new());
    }
}
