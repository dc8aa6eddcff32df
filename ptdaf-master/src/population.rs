//! Synthetic population input
//!
//! Households and persons either come from a JSON file or are synthesized
//! deterministically from the configured seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use ptdaf_common::config::PopulationConfig;
use ptdaf_common::messages::{Household, Occupation, Person};
use ptdaf_common::{Error, Result};

/// Households and the persons living in them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub households: Vec<Household>,
    pub persons: Vec<Person>,
}

impl Population {
    /// Load from `households_file` when configured, otherwise synthesize
    pub fn from_config(config: &PopulationConfig) -> Result<Self> {
        match &config.households_file {
            Some(path) => Self::load(path),
            None => Ok(Self::synthesize(
                config.synthetic_households,
                config.zones,
                config.seed,
            )),
        }
    }

    /// Read a population JSON file (`{"households": [...], "persons": [...]}`)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read population file {}: {}", path.display(), e))
        })?;

        let mut population: Population = serde_json::from_str(&content)?;
        population.link_persons();

        info!(
            "Loaded {} households and {} persons from {}",
            population.households.len(),
            population.persons.len(),
            path.display()
        );
        Ok(population)
    }

    /// Deterministic synthetic population over zones `1..=zones`
    pub fn synthesize(households: usize, zones: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let top_zone = zones.max(1) as u32;
        let mut population = Population::default();
        let mut next_person_id = 1u64;

        for id in 1..=households as u64 {
            let size: u8 = rng.gen_range(1..=5);
            let workers: u8 = rng.gen_range(0..=size.min(3));
            let autos: u8 = rng.gen_range(0..=3);
            let home_zone = rng.gen_range(1..=top_zone);

            let household = Household {
                id,
                home_zone,
                size,
                workers,
                autos,
                work_segment: segment(workers, autos),
                non_work_segment: segment(size - 1, autos),
                members: Vec::new(),
                tours: None,
            };

            for member in 0..size {
                let employed = member < workers;
                let occupation = if employed {
                    Occupation::ALL[rng.gen_range(1..Occupation::ALL.len())]
                } else {
                    Occupation::Unemployed
                };
                population.persons.push(Person {
                    id: next_person_id,
                    household_id: id,
                    home_zone,
                    work_segment: household.work_segment,
                    occupation,
                    employed,
                    work_zone: None,
                });
                next_person_id += 1;
            }

            population.households.push(household);
        }

        info!(
            "Synthesized {} households and {} persons over {} zones (seed {})",
            population.households.len(),
            population.persons.len(),
            top_zone,
            seed
        );
        population
    }

    /// Copy home zone and work segment from each person's household
    fn link_persons(&mut self) {
        let by_id: HashMap<u64, (u32, u8)> = self
            .households
            .iter()
            .map(|h| (h.id, (h.home_zone, h.work_segment)))
            .collect();

        let mut orphans = 0;
        for person in &mut self.persons {
            match by_id.get(&person.household_id) {
                Some(&(home_zone, work_segment)) => {
                    person.home_zone = home_zone;
                    person.work_segment = work_segment;
                }
                None => orphans += 1,
            }
        }

        if orphans > 0 {
            warn!("{} persons reference households missing from the population", orphans);
        }
    }
}

/// Market segment from a count dimension and auto ownership, each capped at 2
fn segment(count: u8, autos: u8) -> u8 {
    count.min(2) * 3 + autos.min(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptdaf_common::messages::TOTAL_SEGMENTS;
    use tempfile::TempDir;

    #[test]
    fn test_synthesis_is_deterministic() {
        assert_eq!(
            Population::synthesize(50, 20, 7),
            Population::synthesize(50, 20, 7)
        );
        assert_ne!(
            Population::synthesize(50, 20, 7),
            Population::synthesize(50, 20, 8)
        );
    }

    #[test]
    fn test_synthesized_records_are_consistent() {
        let population = Population::synthesize(200, 12, 2002);
        assert_eq!(population.households.len(), 200);

        for household in &population.households {
            assert!((1..=12).contains(&household.home_zone));
            assert!(household.work_segment < TOTAL_SEGMENTS);
            assert!(household.non_work_segment < TOTAL_SEGMENTS);

            let members: Vec<&Person> = population
                .persons
                .iter()
                .filter(|p| p.household_id == household.id)
                .collect();
            assert_eq!(members.len(), household.size as usize);
            assert_eq!(
                members.iter().filter(|p| p.employed).count(),
                household.workers as usize
            );
        }

        assert!(population
            .persons
            .iter()
            .all(|p| p.employed == (p.occupation != Occupation::Unemployed)));
    }

    #[test]
    fn test_load_links_persons_to_households() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("population.json");
        std::fs::write(
            &path,
            r#"{
                "households": [{"id": 1, "home_zone": 4, "size": 1, "workers": 1,
                                "autos": 0, "work_segment": 3, "non_work_segment": 0}],
                "persons": [{"id": 10, "household_id": 1, "home_zone": 0, "work_segment": 0,
                             "occupation": "retail", "employed": true}]
            }"#,
        )
        .unwrap();

        let population = Population::load(&path).unwrap();
        assert_eq!(population.persons[0].home_zone, 4);
        assert_eq!(population.persons[0].work_segment, 3);
        assert_eq!(population.persons[0].work_zone, None);
    }

    #[test]
    fn test_missing_population_file() {
        let result = Population::load(Path::new("/nonexistent/population.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
