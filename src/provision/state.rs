use std::path::Path;
use std::time::SystemTime;

use chrono::offset::Utc;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::chain::Error;

/// One materialized resource, as recorded after creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    pub kind: String,
    pub id: String,
    pub address: Option<String>,
    pub created_at: String,
}

/// What already exists from prior runs. The apply step consults this before
/// creating anything, so an unchanged topology converges without duplicating
/// resources. A missing file is an empty state.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProvisionState {
    pub resources: Vec<ResourceRecord>,
}

impl ProvisionState {
    pub fn load(path: &Path) -> Result<ProvisionState, Error> {
        if !path.exists() {
            return Ok(ProvisionState::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let state: ProvisionState = serde_json::from_str(&raw)?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn record(&mut self, record: ResourceRecord) {
        if let Some(existing) = self.resources.iter_mut().find(|r| r.name == record.name) {
            *existing = record;
        } else {
            self.resources.push(record);
        }
    }
}

pub fn timestamp() -> String {
    let datetime: DateTime<Utc> = SystemTime::now().into();
    format!("{}", datetime.format("%d/%m/%Y %T"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, id: &str) -> ResourceRecord {
        ResourceRecord {
            name: name.into(),
            kind: "instance".into(),
            id: id.into(),
            address: Some("10.0.2.10".into()),
            created_at: timestamp(),
        }
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = ProvisionState::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = ProvisionState::default();
        state.record(record("demo-control-1", "i-000001"));
        state.save(&path).unwrap();

        let reloaded = ProvisionState::load(&path).unwrap();
        assert_eq!(reloaded.resources, state.resources);
        assert!(reloaded.find("demo-control-1").is_some());
        assert!(reloaded.find("demo-worker-1").is_none());
    }

    #[test]
    fn recording_the_same_name_replaces_instead_of_duplicating() {
        let mut state = ProvisionState::default();
        state.record(record("demo-control-1", "i-000001"));
        state.record(record("demo-control-1", "i-000002"));
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.find("demo-control-1").unwrap().id, "i-000002");
    }
}
