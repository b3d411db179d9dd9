//! Typed builders for the API commands the session issues.
//!
//! Each builder renders to the exact `api`/`bgapi` argument string via
//! `Display`, so no raw string assembly is needed at call sites:
//!
//! ```
//! use esl_session::{Endpoint, Originate};
//!
//! let cmd = Originate {
//!     endpoint: Endpoint::User {
//!         id: "1001".into(),
//!         domain: None,
//!     },
//!     destination: "2000".into(),
//!     cid_name: Some("Front Desk".into()),
//!     cid_num: None,
//!     timeout: Some(30),
//!     variables: Vec::new(),
//! };
//! assert_eq!(
//!     cmd.to_string(),
//!     "originate {origination_caller_id_name='Front Desk',originate_timeout=30}user/1001 2000"
//! );
//! ```

use std::fmt;

/// Where an originated call leg is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Endpoint {
    /// A registered local user (`user/1001`, `user/1001@domain`).
    User {
        /// User id / extension.
        id: String,
        /// Optional domain qualifier.
        domain: Option<String>,
    },
    /// A sofia gateway (`sofia/gateway/<gateway>/<uri>`).
    SofiaGateway {
        /// Gateway name from the sofia profile.
        gateway: String,
        /// Number or URI dialed through the gateway.
        uri: String,
    },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::User { id, domain } => match domain {
                Some(d) => write!(f, "user/{}@{}", id, d),
                None => write!(f, "user/{}", id),
            },
            Endpoint::SofiaGateway { gateway, uri } => {
                write!(f, "sofia/gateway/{}/{}", gateway, uri)
            }
        }
    }
}

/// `originate` command builder.
///
/// Caller-ID fields and the timeout are rendered as origination variables
/// in the `{...}` block; `variables` entries are appended after them in the
/// order given.
#[derive(Debug, Clone)]
pub struct Originate {
    /// The leg to bring up first.
    pub endpoint: Endpoint,
    /// Extension or application the answered leg is connected to.
    pub destination: String,
    /// `origination_caller_id_name`.
    pub cid_name: Option<String>,
    /// `origination_caller_id_number`.
    pub cid_num: Option<String>,
    /// `originate_timeout` in seconds.
    pub timeout: Option<u32>,
    /// Extra origination variables, rendered as `key=value`.
    pub variables: Vec<(String, String)>,
}

impl fmt::Display for Originate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut vars: Vec<String> = Vec::new();
        if let Some(name) = &self.cid_name {
            vars.push(format!("origination_caller_id_name='{}'", name));
        }
        if let Some(num) = &self.cid_num {
            vars.push(format!("origination_caller_id_number={}", num));
        }
        if let Some(timeout) = self.timeout {
            vars.push(format!("originate_timeout={}", timeout));
        }
        for (key, value) in &self.variables {
            vars.push(format!("{}={}", key, value));
        }

        write!(f, "originate ")?;
        if !vars.is_empty() {
            write!(f, "{{{}}}", vars.join(","))?;
        }
        write!(f, "{} {}", self.endpoint, self.destination)
    }
}

/// Action argument for `uuid_hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HoldAction {
    /// Place the channel on hold.
    Hold,
    /// Take the channel off hold.
    Off,
}

/// `uuid_hold` command builder.
#[derive(Debug, Clone)]
pub struct UuidHold {
    /// What to do with the channel.
    pub action: HoldAction,
    /// Channel UUID.
    pub uuid: String,
}

impl fmt::Display for UuidHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            HoldAction::Hold => write!(f, "uuid_hold {}", self.uuid),
            HoldAction::Off => write!(f, "uuid_hold off {}", self.uuid),
        }
    }
}

/// `uuid_kill` command builder.
#[derive(Debug, Clone)]
pub struct UuidKill {
    /// Channel UUID.
    pub uuid: String,
    /// Optional hangup cause (defaults to `NORMAL_CLEARING` switch-side).
    pub cause: Option<String>,
}

impl fmt::Display for UuidKill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "uuid_kill {} {}", self.uuid, cause),
            None => write!(f, "uuid_kill {}", self.uuid),
        }
    }
}

/// `show <table> as json` listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShowTable {
    /// Active channels.
    Channels,
    /// Active calls (bridged channel pairs).
    Calls,
}

impl fmt::Display for ShowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowTable::Channels => write!(f, "show channels as json"),
            ShowTable::Calls => write!(f, "show calls as json"),
        }
    }
}

/// `sofia status`: profile/gateway/alias overview, tabular text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SofiaStatus;

impl fmt::Display for SofiaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sofia status")
    }
}

/// `sofia status profile <name> reg`: registrations on one profile.
#[derive(Debug, Clone)]
pub struct SofiaRegistrations {
    /// Profile name from `sofia status`.
    pub profile: String,
}

impl fmt::Display for SofiaRegistrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sofia status profile {} reg", self.profile)
    }
}
