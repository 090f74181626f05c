//! Planets (zones) objects are placed in

use std::sync::Arc;

use dashmap::DashMap;

/// A zone of the world, addressed by a small numeric id
#[derive(Debug, PartialEq, Eq)]
pub struct Planet {
    id: u32,
    name: String,
}

impl Planet {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lookup table of active planets
#[derive(Debug, Default)]
pub struct Planets {
    by_id: DashMap<u32, Arc<Planet>>,
}

impl Planets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an ordered list of names; ids are assigned from 1
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let planets = Self::new();
        for (index, name) in names.iter().enumerate() {
            planets.add(Planet::new(index as u32 + 1, name.as_ref()));
        }
        planets
    }

    pub fn add(&self, planet: Planet) -> Arc<Planet> {
        let planet = Arc::new(planet);
        self.by_id.insert(planet.id(), planet.clone());
        planet
    }

    pub fn get(&self, id: u32) -> Option<Arc<Planet>> {
        self.by_id.get(&id).map(|p| p.value().clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Planet>> {
        self.by_id
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.value().clone())
    }

    /// All planets ordered by id
    pub fn all(&self) -> Vec<Arc<Planet>> {
        let mut all: Vec<Arc<Planet>> = self.by_id.iter().map(|p| p.value().clone()).collect();
        all.sort_by_key(|p| p.id());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names_assigns_ids() {
        let planets = Planets::from_names(&["tatooine", "naboo"]);
        assert_eq!(planets.get(1).unwrap().name(), "tatooine");
        assert_eq!(planets.by_name("naboo").unwrap().id(), 2);
        assert!(planets.get(3).is_none());

        let names: Vec<String> = planets.all().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["tatooine", "naboo"]);
    }
}
