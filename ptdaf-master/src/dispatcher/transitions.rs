//! Transition actions: build the next phase's inputs from accumulated replies

use std::collections::{BTreeMap, HashMap};

use ptdaf_common::messages::{Household, Occupation, Person};

/// Employed persons grouped by (work segment, occupation)
#[derive(Debug, Default)]
pub struct WorkerGroups {
    pub groups: BTreeMap<(u8, Occupation), Vec<Person>>,
    /// Persons with no workplace to locate
    pub unemployed: Vec<Person>,
}

/// Group persons for workplace location. Only non-empty groups exist.
pub fn group_workers(persons: Vec<Person>) -> WorkerGroups {
    let mut grouped = WorkerGroups::default();
    for person in persons {
        if person.employed && person.occupation != Occupation::Unemployed {
            grouped
                .groups
                .entry((person.work_segment, person.occupation))
                .or_default()
                .push(person);
        } else {
            grouped.unemployed.push(person);
        }
    }
    grouped
}

/// Order households by (work segment, non-work segment), keeping input order
/// within a group
pub fn order_households(households: Vec<Household>) -> Vec<Household> {
    let mut grouped: BTreeMap<(u8, u8), Vec<Household>> = BTreeMap::new();
    for household in households {
        grouped
            .entry((household.work_segment, household.non_work_segment))
            .or_default()
            .push(household);
    }
    grouped.into_values().flatten().collect()
}

/// Attach persons to their households, replacing any previous members.
///
/// Returns the number of persons whose household is unknown.
pub fn attach_members(households: &mut [Household], persons: &[Person]) -> usize {
    let index: HashMap<u64, usize> = households
        .iter()
        .enumerate()
        .map(|(i, household)| (household.id, i))
        .collect();

    for household in households.iter_mut() {
        household.members.clear();
    }

    let mut orphans = 0;
    for person in persons {
        match index.get(&person.household_id) {
            Some(&i) => households[i].members.push(person.clone()),
            None => orphans += 1,
        }
    }

    for household in households.iter_mut() {
        household.members.sort_by_key(|p| p.id);
    }
    orphans
}
