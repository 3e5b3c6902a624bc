//! Typed, validated per-target sync configuration.
//!
//! Every synchronized group carries its runtime configuration as custom
//! attributes named `synchronized_group_<field>`. Parsing is atomic: all
//! missing required attributes are reported in one error, and all values
//! that fail type conversion are reported in one error, rather than
//! failing on the first bad field.

use thiserror::Error;

use groupsync_directory::{Attributes, GroupPath};

use crate::notify::templates;

/// Prefix shared by all sync configuration attributes.
pub const ATTR_PREFIX: &str = "synchronized_group_";

/// Full attribute name for a configuration field.
#[must_use]
pub fn attr_name(field: &str) -> String {
    format!("{ATTR_PREFIX}{field}")
}

/// Membership reconciliation policy of a target group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Remove members who do not belong to any source group; never add.
    Prune,
    /// Remove extraneous members and add missing ones, so that membership
    /// matches the union of the source groups.
    Match,
}

impl SyncPolicy {
    /// String representation, matching the attribute value syntax.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPolicy::Prune => "prune",
            SyncPolicy::Match => "match",
        }
    }
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Attribute values are matched exactly; no case folding.
        match s {
            "prune" => Ok(SyncPolicy::Prune),
            "match" => Ok(SyncPolicy::Match),
            _ => Err(format!("unknown policy: {s}")),
        }
    }
}

/// Membership transition events that can notify the affected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// A user was added to the target group.
    AdditionOccurred,
    /// A user was scheduled for removal (grace period started).
    RemovalPending,
    /// A scheduled removal was cancelled because the user re-qualified.
    RemovalAverted,
    /// A user was removed from the target group.
    RemovalOccurred,
}

impl SyncEvent {
    /// Attribute-name stem of this event ("addition_occurred", ...).
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            SyncEvent::AdditionOccurred => "addition_occurred",
            SyncEvent::RemovalPending => "removal_pending",
            SyncEvent::RemovalAverted => "removal_averted",
            SyncEvent::RemovalOccurred => "removal_occurred",
        }
    }

    /// All events, in processing order.
    pub const ALL: [SyncEvent; 4] = [
        SyncEvent::AdditionOccurred,
        SyncEvent::RemovalPending,
        SyncEvent::RemovalAverted,
        SyncEvent::RemovalOccurred,
    ];
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// An attribute value that failed type conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValue {
    /// Full attribute name.
    pub attribute: String,
    /// The raw value as stored in the directory.
    pub value: String,
    /// Human-readable description of the expected type.
    pub expected: &'static str,
}

impl std::fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={:?} (expected {})",
            self.attribute, self.value, self.expected
        )
    }
}

fn join_invalid(values: &[InvalidValue]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration of a target group could not be constructed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required attributes are absent.
    #[error("group {group} is missing required attributes: {}", attributes.join(", "))]
    MissingAttributes {
        /// Target group the configuration belongs to.
        group: GroupPath,
        /// Full names of every missing attribute.
        attributes: Vec<String>,
    },

    /// One or more attributes are present but failed type conversion.
    #[error("group {group} has invalid attribute values: {}", join_invalid(values))]
    InvalidValues {
        /// Target group the configuration belongs to.
        group: GroupPath,
        /// Every field that failed conversion, with the offending value.
        values: Vec<InvalidValue>,
    },
}

/// Final notification bodies per event type, with placeholders still
/// unexpanded. `None` means notifications for that event are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMessages {
    addition_occurred: Option<String>,
    removal_pending: Option<String>,
    removal_averted: Option<String>,
    removal_occurred: Option<String>,
}

impl EventMessages {
    /// Message template for an event, if notifications are enabled for it.
    #[must_use]
    pub fn get(&self, event: SyncEvent) -> Option<&str> {
        match event {
            SyncEvent::AdditionOccurred => self.addition_occurred.as_deref(),
            SyncEvent::RemovalPending => self.removal_pending.as_deref(),
            SyncEvent::RemovalAverted => self.removal_averted.as_deref(),
            SyncEvent::RemovalOccurred => self.removal_occurred.as_deref(),
        }
    }

    fn set(&mut self, event: SyncEvent, message: Option<String>) {
        let slot = match event {
            SyncEvent::AdditionOccurred => &mut self.addition_occurred,
            SyncEvent::RemovalPending => &mut self.removal_pending,
            SyncEvent::RemovalAverted => &mut self.removal_averted,
            SyncEvent::RemovalOccurred => &mut self.removal_occurred,
        };
        *slot = message;
    }
}

/// Validated sync configuration of one target group.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Path of the target group.
    pub group_path: GroupPath,
    /// Whether automatic discovery manages this group.
    pub auto_enabled: bool,
    /// Membership policy.
    pub policy: SyncPolicy,
    /// Path-query expression yielding source group paths.
    pub source_query: String,
    /// Days to delay removal of extraneous members; 0 disables the grace
    /// period.
    pub removal_grace_days: u32,
    /// Notification bodies per event.
    pub messages: EventMessages,
}

impl SyncConfig {
    /// Build a validated configuration from a target group's attributes.
    ///
    /// `source_query_override` replaces the `sources_expr` attribute and
    /// waives its presence requirement; manual mode uses this.
    pub fn from_group(
        group_path: GroupPath,
        attrs: &Attributes,
        source_query_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut reader = AttrReader::new(attrs);

        let enable_raw = reader.required("enable");
        let policy_raw = reader.required("policy");
        let source_query = match source_query_override {
            Some(query) => Some(query),
            None => reader.required("sources_expr").map(str::to_string),
        };
        let removal_grace_days = reader.u32_or("removal_grace_days", 0);

        let mut messages = EventMessages::default();
        for event in SyncEvent::ALL {
            let notify = reader.bool_or(&format!("{}_notify", event.key()), true);
            let override_ = reader.text(&format!("{}_message_override", event.key()));
            let append = reader.text(&format!("{}_message_append", event.key()));
            messages.set(
                event,
                build_message(notify, &override_, &append, templates::default_body(event)),
            );
        }

        // Conversions of required fields, once presence is known.
        let auto_enabled = enable_raw.and_then(|raw| reader.convert_bool("enable", raw));
        let policy = policy_raw.and_then(|raw| reader.convert_policy(raw));

        if !reader.missing.is_empty() {
            return Err(ConfigError::MissingAttributes {
                group: group_path,
                attributes: reader.missing,
            });
        }
        if !reader.invalid.is_empty() {
            return Err(ConfigError::InvalidValues {
                group: group_path,
                values: reader.invalid,
            });
        }

        Ok(SyncConfig {
            group_path,
            // The fallbacks are unreachable: a None implies an entry in
            // either `missing` or `invalid`, both checked above.
            auto_enabled: auto_enabled.unwrap_or_default(),
            policy: policy.unwrap_or(SyncPolicy::Prune),
            source_query: source_query.unwrap_or_default(),
            removal_grace_days,
            messages,
        })
    }

    /// Length of the removal grace period.
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.removal_grace_days))
    }
}

/// Compose the final message body for one event.
///
/// Precedence: disabled event produces no body; an override template wins
/// over the default; otherwise the default template plus an optional
/// appended paragraph. A fixed footer follows every non-empty body.
fn build_message(notify: bool, override_: &str, append: &str, default_body: &str) -> Option<String> {
    if !notify {
        return None;
    }
    let body = if !override_.is_empty() {
        override_.to_string()
    } else if append.is_empty() {
        default_body.to_string()
    } else {
        format!("{default_body}\n\n{append}")
    };
    Some(format!("{body}{}", templates::MESSAGE_FOOTER))
}

/// Attribute reader that accumulates missing fields and conversion
/// failures instead of short-circuiting.
struct AttrReader<'a> {
    attrs: &'a Attributes,
    missing: Vec<String>,
    invalid: Vec<InvalidValue>,
}

impl<'a> AttrReader<'a> {
    fn new(attrs: &'a Attributes) -> Self {
        Self {
            attrs,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn required(&mut self, field: &str) -> Option<&'a str> {
        let name = attr_name(field);
        match self.attrs.first(&name) {
            Some(value) => Some(value),
            None => {
                self.missing.push(name);
                None
            }
        }
    }

    fn convert_bool(&mut self, field: &str, raw: &str) -> Option<bool> {
        match raw.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => {
                self.push_invalid(field, raw, "boolean (true/false)");
                None
            }
        }
    }

    fn convert_policy(&mut self, raw: &str) -> Option<SyncPolicy> {
        match raw.parse() {
            Ok(policy) => Some(policy),
            Err(_) => {
                self.push_invalid("policy", raw, "policy (prune|match)");
                None
            }
        }
    }

    fn bool_or(&mut self, field: &str, default: bool) -> bool {
        match self.attrs.first(&attr_name(field)) {
            Some(raw) => self.convert_bool(field, raw).unwrap_or(default),
            None => default,
        }
    }

    fn u32_or(&mut self, field: &str, default: u32) -> u32 {
        match self.attrs.first(&attr_name(field)) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) => value,
                Err(_) => {
                    self.push_invalid(field, raw, "non-negative integer");
                    default
                }
            },
            None => default,
        }
    }

    /// Free-text attribute; `@@` marks a paragraph break.
    fn text(&mut self, field: &str) -> String {
        self.attrs
            .first(&attr_name(field))
            .map(|raw| raw.replace("@@", "\n"))
            .unwrap_or_default()
    }

    fn push_invalid(&mut self, field: &str, value: &str, expected: &'static str) {
        self.invalid.push(InvalidValue {
            attribute: attr_name(field),
            value: value.to_string(),
            expected,
        });
    }
}
