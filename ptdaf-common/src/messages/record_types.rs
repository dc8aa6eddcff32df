//! Domain records carried by work and reply messages

use serde::{Deserialize, Serialize};

/// Person occupation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupation {
    Unemployed,
    Manager,
    Professional,
    Health,
    PostSecondaryTeacher,
    OtherTeacher,
    Retail,
    Service,
    Other,
}

impl Occupation {
    /// Every occupation code, unemployed first
    pub const ALL: [Occupation; 9] = [
        Occupation::Unemployed,
        Occupation::Manager,
        Occupation::Professional,
        Occupation::Health,
        Occupation::PostSecondaryTeacher,
        Occupation::OtherTeacher,
        Occupation::Retail,
        Occupation::Service,
        Occupation::Other,
    ];
}

/// Synthetic population person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub household_id: u64,
    pub home_zone: u32,
    /// Work logsum segment inherited from the household
    pub work_segment: u8,
    pub occupation: Occupation,
    pub employed: bool,
    /// Assigned by the workplace location phase
    #[serde(default)]
    pub work_zone: Option<u32>,
}

/// Synthetic population household
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Household {
    pub id: u64,
    pub home_zone: u32,
    pub size: u8,
    pub workers: u8,
    pub autos: u8,
    pub work_segment: u8,
    pub non_work_segment: u8,
    /// Persons attached after workplace location
    #[serde(default)]
    pub members: Vec<Person>,
    /// Weekday tours produced by household processing
    #[serde(default)]
    pub tours: Option<u32>,
}

/// Per-zone totals broadcast to every worker before destination choice
///
/// Vectors are indexed by zone number; index 0 is unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneData {
    pub households_by_zone: Vec<u32>,
    pub post_secondary_teachers: Vec<u32>,
    pub other_teachers: Vec<u32>,
}

impl ZoneData {
    /// Tabulate households by home zone and teachers by work zone.
    ///
    /// Zones outside `1..=zones` are ignored.
    pub fn tabulate(zones: usize, households: &[Household], persons: &[Person]) -> Self {
        let mut data = ZoneData {
            households_by_zone: vec![0; zones + 1],
            post_secondary_teachers: vec![0; zones + 1],
            other_teachers: vec![0; zones + 1],
        };

        for household in households {
            if let Some(count) = data.households_by_zone.get_mut(household.home_zone as usize) {
                *count += 1;
            }
        }

        for person in persons {
            let Some(zone) = person.work_zone else { continue };
            let column = match person.occupation {
                Occupation::PostSecondaryTeacher => &mut data.post_secondary_teachers,
                Occupation::OtherTeacher => &mut data.other_teachers,
                _ => continue,
            };
            if let Some(count) = column.get_mut(zone as usize) {
                *count += 1;
            }
        }

        data
    }

    /// Highest zone number covered
    pub fn zones(&self) -> usize {
        self.households_by_zone.len().saturating_sub(1)
    }
}

/// Bounded slice of a record set dispatched as one work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block<R> {
    /// Emission order across the whole record set
    pub sequence: usize,
    pub records: Vec<R>,
    /// Worker must ask for more work when it finishes this block
    pub request_refill: bool,
}

impl<R> Block<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
