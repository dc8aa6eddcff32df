//! Pipeline phase tags and per-phase work/reply payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use super::record_types::{Occupation, Person};

/// Number of household market segments used by the logsum phases
pub const TOTAL_SEGMENTS: u8 = 9;

/// Pipeline stage gated by a completion-count barrier
///
/// Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTag {
    /// Tour mode choice logsums, one message per (purpose, segment)
    ModeChoiceLogsums,
    /// Workplace location, one message per (work segment, occupation) group
    WorkplaceLocation,
    /// Zone data refresh broadcast to every worker
    ZoneDataUpdate,
    /// Destination choice logsums for non-work purposes
    DestinationChoiceLogsums,
    /// Flow-controlled household block processing
    HouseholdProcessing,
}

impl PhaseTag {
    /// Short name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseTag::ModeChoiceLogsums => "mode_choice_logsums",
            PhaseTag::WorkplaceLocation => "workplace_location",
            PhaseTag::ZoneDataUpdate => "zone_data_update",
            PhaseTag::DestinationChoiceLogsums => "destination_choice_logsums",
            PhaseTag::HouseholdProcessing => "household_processing",
        }
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tour purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Work,
    School,
    Shop,
    Recreate,
    Other,
    WorkBased,
}

impl Purpose {
    /// All purposes in model order
    pub const ALL: [Purpose; 6] = [
        Purpose::Work,
        Purpose::School,
        Purpose::Shop,
        Purpose::Recreate,
        Purpose::Other,
        Purpose::WorkBased,
    ];

    /// Purposes that need destination choice logsums (work is handled by workplace location)
    pub const NON_WORK: [Purpose; 5] = [
        Purpose::School,
        Purpose::Shop,
        Purpose::Recreate,
        Purpose::Other,
        Purpose::WorkBased,
    ];

    /// One-letter purpose code
    pub fn code(&self) -> char {
        match self {
            Purpose::Work => 'w',
            Purpose::School => 'c',
            Purpose::Shop => 's',
            Purpose::Recreate => 'r',
            Purpose::Other => 'o',
            Purpose::WorkBased => 'b',
        }
    }
}

/// Composite (purpose, segment) key addressing one logsum computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    pub purpose: Purpose,
    pub segment: u8,
}

impl SegmentKey {
    /// Cross product of the given purposes with every market segment
    pub fn cross_product(purposes: &[Purpose]) -> Vec<SegmentKey> {
        purposes
            .iter()
            .flat_map(|&purpose| (0..TOTAL_SEGMENTS).map(move |segment| SegmentKey { purpose, segment }))
            .collect()
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.purpose.code(), self.segment)
    }
}

/// Work unit for the round-robin phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseWork {
    ModeChoiceLogsums {
        key: SegmentKey,
    },
    WorkplaceLocation {
        segment: u8,
        occupation: Occupation,
        persons: Vec<Person>,
    },
    DestinationChoiceLogsums {
        key: SegmentKey,
    },
}

impl PhaseWork {
    /// Phase this work unit belongs to
    pub fn phase(&self) -> PhaseTag {
        match self {
            PhaseWork::ModeChoiceLogsums { .. } => PhaseTag::ModeChoiceLogsums,
            PhaseWork::WorkplaceLocation { .. } => PhaseTag::WorkplaceLocation,
            PhaseWork::DestinationChoiceLogsums { .. } => PhaseTag::DestinationChoiceLogsums,
        }
    }
}

/// Reply payload for the round-robin phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseReply {
    /// Logsums for the key are available on the worker
    LogsumsCreated { key: SegmentKey },
    /// Persons returned with work zones (unchanged persons on failure)
    WorkplacesAssigned { persons: Vec<Person> },
}
