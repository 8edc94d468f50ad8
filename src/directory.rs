use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Vehicle, VehicleId};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("vehicle directory unreachable: {0}")]
    Unavailable(String),
    #[error("failed to load vehicles: {0}")]
    Load(String),
}

/// Read-only access to vehicle listings owned by another service.
/// The booking engine never writes through this interface.
#[async_trait]
pub trait VehicleDirectory: Send + Sync + 'static {
    async fn vehicle(&self, id: &str) -> Result<Option<Vehicle>, DirectoryError>;

    async fn vehicles_owned_by(&self, owner_id: &str) -> Result<Vec<Vehicle>, DirectoryError>;

    /// Listed vehicles, optionally narrowed to a location (case-insensitive).
    async fn listed_vehicles(&self, location: Option<&str>) -> Result<Vec<Vehicle>, DirectoryError>;
}

/// Directory held in process memory. Backs the server binary (seeded from a
/// JSON file) and the tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    vehicles: DashMap<VehicleId, Vehicle>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicles(vehicles: impl IntoIterator<Item = Vehicle>) -> Self {
        let dir = Self::new();
        for v in vehicles {
            dir.upsert(v);
        }
        dir
    }

    /// Load a JSON array of vehicles, e.g.
    /// `[{"id":"car-1","ownerId":"u1","dailyRate":100,"listed":true}]`.
    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Load(format!("{}: {e}", path.display())))?;
        let vehicles: Vec<Vehicle> = serde_json::from_str(&raw)
            .map_err(|e| DirectoryError::Load(format!("{}: {e}", path.display())))?;
        Ok(Self::with_vehicles(vehicles))
    }

    pub fn upsert(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
    }

    pub fn set_listed(&self, id: &str, listed: bool) -> bool {
        match self.vehicles.get_mut(id) {
            Some(mut v) => {
                v.listed = listed;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryDirectory {
    async fn vehicle(&self, id: &str) -> Result<Option<Vehicle>, DirectoryError> {
        Ok(self.vehicles.get(id).map(|e| e.value().clone()))
    }

    async fn vehicles_owned_by(&self, owner_id: &str) -> Result<Vec<Vehicle>, DirectoryError> {
        Ok(self
            .vehicles
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn listed_vehicles(&self, location: Option<&str>) -> Result<Vec<Vehicle>, DirectoryError> {
        let mut found: Vec<Vehicle> = self
            .vehicles
            .iter()
            .filter(|e| e.value().listed)
            .filter(|e| match location {
                Some(loc) => e
                    .value()
                    .location
                    .as_deref()
                    .is_some_and(|l| l.eq_ignore_ascii_case(loc.trim())),
                None => true,
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(id: &str, owner: &str, listed: bool, location: Option<&str>) -> Vehicle {
        Vehicle {
            id: id.into(),
            owner_id: owner.into(),
            daily_rate: 100,
            listed,
            name: None,
            location: location.map(Into::into),
        }
    }

    #[tokio::test]
    async fn lookup_and_owner_filter() {
        let dir = InMemoryDirectory::with_vehicles([
            car("a", "alice", true, None),
            car("b", "alice", false, None),
            car("c", "bob", true, None),
        ]);
        assert_eq!(dir.vehicle("c").await.unwrap().unwrap().owner_id, "bob");
        assert!(dir.vehicle("zzz").await.unwrap().is_none());

        let mut owned: Vec<_> = dir
            .vehicles_owned_by("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        owned.sort();
        assert_eq!(owned, vec!["a", "b"]);
        assert!(dir.vehicles_owned_by("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listed_vehicles_by_location() {
        let dir = InMemoryDirectory::with_vehicles([
            car("a", "alice", true, Some("Lahore")),
            car("b", "alice", false, Some("Lahore")),
            car("c", "bob", true, Some("Karachi")),
            car("d", "bob", true, None),
        ]);
        let all: Vec<_> = dir.listed_vehicles(None).await.unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(all, vec!["a", "c", "d"]);

        let lahore: Vec<_> = dir
            .listed_vehicles(Some(" lahore"))
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(lahore, vec!["a"]);
    }

    #[tokio::test]
    async fn set_listed_toggles() {
        let dir = InMemoryDirectory::with_vehicles([car("a", "alice", true, None)]);
        assert!(dir.set_listed("a", false));
        assert!(!dir.vehicle("a").await.unwrap().unwrap().listed);
        assert!(!dir.set_listed("missing", true));
    }

    #[test]
    fn load_from_json_file() {
        let dir = std::env::temp_dir().join("carbook_test_directory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vehicles.json");
        std::fs::write(
            &path,
            r#"[{"id":"car-1","ownerId":"owner-1","dailyRate":100,"listed":true,"location":"Lahore"}]"#,
        )
        .unwrap();

        let loaded = InMemoryDirectory::from_json_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            InMemoryDirectory::from_json_file(&path),
            Err(DirectoryError::Load(_))
        ));
        let _ = std::fs::remove_file(&path);
    }
}
