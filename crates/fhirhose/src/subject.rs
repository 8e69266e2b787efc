use crate::stream::StreamName;

use std::fmt::{self, Display};

/// Default name of the broker-side stream all subjects are captured in.
pub const DEFAULT_STREAM_NAME: &str = "fhirhose";

/// Pipeline stage an event announces.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// The record was found by a poll.
    Polled,

    /// The full record was retrieved.
    Retrieved,

    /// The record was transformed.
    Transformed,

    /// The record was uploaded.
    Uploaded,
}

impl Action {
    /// The subject token for this action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polled => "polled",
            Self::Retrieved => "retrieved",
            Self::Transformed => "transformed",
            Self::Uploaded => "uploaded",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects one of the two independent consumer groups per stage.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LoadClass {
    /// Steady state traffic.
    Default,

    /// Bulk or backfill loads.
    CustomLoad,
}

impl LoadClass {
    /// Both load classes, default first.
    pub const ALL: [Self; 2] = [Self::Default, Self::CustomLoad];

    /// The subject prefix for this load class.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Default => "fhirhose",
            Self::CustomLoad => "fhirhosecl",
        }
    }
}

impl Display for LoadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Builds `prefix.stream.action.identifier`.
#[must_use]
pub fn publish_subject(
    identifier: &str,
    stream: &StreamName,
    load_class: LoadClass,
    action: Action,
) -> String {
    format!("{load_class}.{stream}.{action}.{identifier}")
}

/// Builds the durable consumer group name `prefix-stream-action`.
#[must_use]
pub fn consume_group(stream: &StreamName, load_class: LoadClass, action: Action) -> String {
    format!("{load_class}-{stream}-{action}")
}

/// Builds the filter subject matching every identifier of one stage, `prefix.stream.action.>`.
#[must_use]
pub fn filter_subject(stream: &StreamName, load_class: LoadClass, action: Action) -> String {
    format!("{load_class}.{stream}.{action}.>")
}

/// Returns everything after the last dot of a publish subject.
///
/// Identifiers that themselves contain dots are truncated to their last segment.
#[must_use]
pub fn extract_identifier(subject: &str) -> &str {
    subject
        .rsplit_once('.')
        .map_or(subject, |(_, identifier)| identifier)
}
