//! Collaborator contract invoked by workers
//!
//! The travel model itself (utilities, logsums, choice probabilities) is an
//! external concern. Workers only depend on [`TravelModel`]: given input
//! records, return output records after a bounded, synchronous computation.

use ptdaf_common::messages::{Household, Occupation, Person, SegmentKey, ZoneData};
use ptdaf_common::{Error, ModelContext, Result};

/// Phase computations a worker can run
///
/// Methods are synchronous and may take arbitrarily long; workers run them
/// on the blocking pool. Errors and panics are caught by the worker.
pub trait TravelModel: Send + Sync + 'static {
    /// Build tour mode choice logsums for one (purpose, segment)
    fn mode_choice_logsums(&self, context: &ModelContext, key: SegmentKey) -> Result<()>;

    /// Assign work zones to one (work segment, occupation) group
    fn workplace_locations(
        &self,
        context: &ModelContext,
        segment: u8,
        occupation: Occupation,
        persons: Vec<Person>,
    ) -> Result<Vec<Person>>;

    /// Accept refreshed zone totals
    fn update_zone_data(&self, context: &ModelContext, zone_data: &ZoneData) -> Result<()>;

    /// Build destination choice logsums for one non-work (purpose, segment)
    fn destination_choice_logsums(
        &self,
        context: &ModelContext,
        key: SegmentKey,
        zone_data: Option<&ZoneData>,
    ) -> Result<()>;

    /// Run the household models for one block
    fn process_households(
        &self,
        context: &ModelContext,
        zone_data: Option<&ZoneData>,
        households: Vec<Household>,
    ) -> Result<Vec<Household>>;
}

/// Deterministic lightweight model so the pipeline runs end to end
#[derive(Debug, Default, Clone)]
pub struct ReferenceModel;

impl ReferenceModel {
    fn work_zone(context: &ModelContext, person: &Person) -> u32 {
        let zones = context.zones.max(1) as u64;
        let mix = person.home_zone as u64 * 31 + person.occupation as u64 * 7 + context.seed;
        (mix % zones + 1) as u32
    }
}

impl TravelModel for ReferenceModel {
    fn mode_choice_logsums(&self, context: &ModelContext, key: SegmentKey) -> Result<()> {
        if key.segment >= context.segments {
            return Err(Error::Computation(format!("Unknown market segment {}", key)));
        }
        Ok(())
    }

    fn workplace_locations(
        &self,
        context: &ModelContext,
        _segment: u8,
        _occupation: Occupation,
        mut persons: Vec<Person>,
    ) -> Result<Vec<Person>> {
        for person in persons.iter_mut().filter(|p| p.employed) {
            person.work_zone = Some(Self::work_zone(context, person));
        }
        Ok(persons)
    }

    fn update_zone_data(&self, context: &ModelContext, zone_data: &ZoneData) -> Result<()> {
        if zone_data.zones() != context.zones {
            return Err(Error::Computation(format!(
                "Zone data covers {} zones, model expects {}",
                zone_data.zones(),
                context.zones
            )));
        }
        Ok(())
    }

    fn destination_choice_logsums(
        &self,
        context: &ModelContext,
        key: SegmentKey,
        zone_data: Option<&ZoneData>,
    ) -> Result<()> {
        if zone_data.is_none() {
            return Err(Error::Computation(format!(
                "Destination choice logsums {} requested before zone data update",
                key
            )));
        }
        self.mode_choice_logsums(context, key)
    }

    fn process_households(
        &self,
        _context: &ModelContext,
        zone_data: Option<&ZoneData>,
        mut households: Vec<Household>,
    ) -> Result<Vec<Household>> {
        let zone_data = zone_data.ok_or_else(|| {
            Error::Computation("Household block received before zone data update".to_string())
        })?;

        for household in households.iter_mut() {
            let neighbours = zone_data
                .households_by_zone
                .get(household.home_zone as usize)
                .copied()
                .unwrap_or(0);
            let non_workers = household.size.saturating_sub(household.workers) as u32;
            let mut tours = household.workers as u32 + non_workers.div_ceil(2);
            if household.autos > 0 && neighbours > 1 {
                tours += 1;
            }
            household.tours = Some(tours);
        }

        Ok(households)
    }
}
