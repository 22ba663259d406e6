//! Control Plane
//!
//! The operations an outer shell (CLI, HTTP front end) drives. Every call
//! returns a [`Response`] that serialises as
//! `{ "success": bool, "message": str, "kind"?: str, ...data }`, with the
//! error category in `kind` when the call failed.

use crate::engine::{EngineStatus, KeyEngine};
use crate::macro_runner::{MacroRunner, MacroStatus};
use keyrelay_core::keys::{self, ComboExample, KeyGroup};
use keyrelay_core::mapping::Mapping;
use keyrelay_core::recipe::{self, RecipeInfo};
use keyrelay_core::registry::{DuplicateInfo, MappingRegistry, RegistryStats};
use keyrelay_core::{ErrorKind, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct Response<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> Response<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            data: Some(data),
        }
    }

    fn from_result(result: Result<T>, message: impl FnOnce(&T) -> String) -> Self {
        match result {
            Ok(data) => Self::ok(message(&data), data),
            Err(e) => {
                warn!("Control request failed: {}", e);
                Self {
                    success: false,
                    message: e.to_string(),
                    kind: Some(e.kind()),
                    data: None,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MappingList {
    pub mappings: BTreeMap<String, Vec<Mapping>>,
    pub stats: RegistryStats,
    pub duplicate_info: BTreeMap<String, DuplicateInfo>,
}

#[derive(Debug, Serialize)]
pub struct MappingData {
    pub mapping: Mapping,
}

#[derive(Debug, Serialize)]
pub struct DeletedData {
    pub deleted_id: String,
    pub deleted_name: String,
}

impl From<Mapping> for DeletedData {
    fn from(removed: Mapping) -> Self {
        Self {
            deleted_id: removed.id,
            deleted_name: removed.name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearedData {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct EngineData {
    pub status: EngineStatus,
}

#[derive(Debug, Serialize)]
pub struct KeysData {
    pub groups: Vec<KeyGroup>,
    pub triggers: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct CombosData {
    pub examples: Vec<ComboExample>,
}

#[derive(Debug, Serialize)]
pub struct RecipesData {
    pub recipes: Vec<RecipeInfo>,
}

#[derive(Debug, Serialize)]
pub struct MacroData {
    pub status: MacroStatus,
}

pub struct ControlPlane {
    engine: Arc<KeyEngine>,
    runner: Arc<MacroRunner>,
}

impl ControlPlane {
    pub fn new(engine: Arc<KeyEngine>, runner: Arc<MacroRunner>) -> Self {
        Self { engine, runner }
    }

    fn registry(&self) -> &MappingRegistry {
        self.engine.registry()
    }

    pub fn list(&self) -> Response<MappingList> {
        let registry = self.registry();
        let list = MappingList {
            mappings: registry.all(),
            stats: registry.stats(),
            duplicate_info: registry.duplicate_info(),
        };
        let message = format!(
            "{} mappings across {} triggers",
            list.stats.total, list.stats.unique_triggers
        );
        Response::ok(message, list)
    }

    /// Create a mapping from a textual key sequence such as `"a(50), ctrl+c"`
    pub fn create(&self, name: &str, start_key: &str, key_sequence: &str) -> Response<MappingData> {
        let result = keys::parse_sequence(key_sequence)
            .map_err(Into::into)
            .and_then(|steps| self.registry().add(name, start_key, steps))
            .map(|mapping| MappingData { mapping });
        Response::from_result(result, |data| {
            let m = &data.mapping;
            if m.enabled {
                format!("Mapping '{}' created on {}", m.name, m.trigger)
            } else {
                format!(
                    "Mapping '{}' created disabled: {} already has an active mapping",
                    m.name, m.trigger
                )
            }
        })
    }

    pub fn update(&self, id: &str, name: &str, start_key: &str, key_sequence: &str) -> Response<MappingData> {
        let result = keys::parse_sequence(key_sequence)
            .map_err(Into::into)
            .and_then(|steps| self.registry().update_by_id(id, name, start_key, steps))
            .map(|mapping| MappingData { mapping });
        Response::from_result(result, |data| format!("Mapping '{}' updated", data.mapping.name))
    }

    pub fn delete_by_id(&self, id: &str) -> Response<DeletedData> {
        let result = self
            .registry()
            .remove_by_id(id)
            .map(DeletedData::from);
        Response::from_result(result, |data| {
            format!("Mapping '{}' ({}) deleted", data.deleted_name, data.deleted_id)
        })
    }

    pub fn delete_by_trigger(&self, trigger: &str) -> Response<DeletedData> {
        let result = self
            .registry()
            .remove_by_trigger(trigger)
            .map(DeletedData::from);
        Response::from_result(result, |data| {
            format!("Mapping '{}' ({}) deleted", data.deleted_name, data.deleted_id)
        })
    }

    pub fn toggle_by_id(&self, id: &str) -> Response<MappingData> {
        let result = self.registry().toggle_by_id(id).map(|mapping| MappingData { mapping });
        Response::from_result(result, toggled_message)
    }

    pub fn toggle_by_trigger(&self, trigger: &str) -> Response<MappingData> {
        let result = self
            .registry()
            .toggle_by_trigger(trigger)
            .map(|mapping| MappingData { mapping });
        Response::from_result(result, toggled_message)
    }

    pub fn engine_start(&self) -> Response<EngineData> {
        let result = self.engine.start().map(|()| EngineData {
            status: self.engine.status(),
        });
        Response::from_result(result, |_| "Trigger engine started".to_string())
    }

    pub fn engine_stop(&self) -> Response<EngineData> {
        let result = self.engine.stop().map(|()| EngineData {
            status: self.engine.status(),
        });
        Response::from_result(result, |_| "Trigger engine stopped".to_string())
    }

    pub fn engine_clear(&self) -> Response<ClearedData> {
        let result = self.engine.clear().map(|removed| ClearedData { removed });
        Response::from_result(result, |data| format!("Removed {} mappings", data.removed))
    }

    pub fn engine_status(&self) -> Response<EngineData> {
        let status = self.engine.status();
        Response::ok(format!("Trigger engine is {}", status.state), EngineData { status })
    }

    pub fn available_keys(&self) -> Response<KeysData> {
        let data = KeysData {
            groups: keys::available_keys(),
            triggers: keys::trigger_names(),
        };
        Response::ok(format!("{} key groups", data.groups.len()), data)
    }

    pub fn combo_examples(&self) -> Response<CombosData> {
        let data = CombosData {
            examples: keys::combo_examples(),
        };
        Response::ok(format!("{} combo examples", data.examples.len()), data)
    }

    pub fn recipes(&self) -> Response<RecipesData> {
        let data = RecipesData {
            recipes: recipe::list(),
        };
        Response::ok(format!("{} built-in macros", data.recipes.len()), data)
    }

    pub fn macro_start(&self, mode: &str, hours: Option<f64>, is_resume: bool) -> Response<MacroData> {
        let result = self.runner.start(mode, hours, is_resume).map(|()| MacroData {
            status: self.runner.status(),
        });
        Response::from_result(result, |data| match data.status.recipe {
            Some(name) => format!("Macro '{}' started", name),
            None => "Macro started".to_string(),
        })
    }

    pub fn macro_stop(&self) -> Response<MacroData> {
        let result = self.runner.stop().map(|()| MacroData {
            status: self.runner.status(),
        });
        Response::from_result(result, |_| "Macro stopped".to_string())
    }

    pub fn macro_reset(&self) -> Response<MacroData> {
        let result = self.runner.reset().map(|()| MacroData {
            status: self.runner.status(),
        });
        Response::from_result(result, |_| "Macro timer reset".to_string())
    }

    pub fn macro_status(&self) -> Response<MacroData> {
        let status = self.runner.status();
        let message = if status.running { "Macro is running" } else { "Macro is idle" };
        Response::ok(message, MacroData { status })
    }
}

fn toggled_message(data: &MappingData) -> String {
    let state = if data.mapping.enabled { "enabled" } else { "disabled" };
    format!("Mapping '{}' {}", data.mapping.name, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::input_sender::shared;
    use crate::macro_runner::RunnerSettings;
    use crate::test_support::{ChannelHook, RecordingEmitter};
    use keyrelay_core::notify::NotificationHub;
    use serde_json::{json, Value};

    fn plane() -> ControlPlane {
        plane_with(MappingRegistry::in_memory())
    }

    fn plane_with(registry: MappingRegistry) -> ControlPlane {
        let (emitter, _log) = RecordingEmitter::new();
        let emitter = shared(Box::new(emitter));
        let (hook, _driver) = ChannelHook::new();
        let engine = KeyEngine::new(
            Arc::new(registry),
            Arc::clone(&emitter),
            Box::new(hook),
            EngineSettings::default(),
        );
        let runner = MacroRunner::new(emitter, Arc::new(NotificationHub::disabled()), RunnerSettings::default());
        ControlPlane::new(Arc::new(engine), Arc::new(runner))
    }

    fn to_json<T: Serialize>(response: &Response<T>) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let plane = plane();
        let created = to_json(&plane.create("copy", "End", "ctrl+c(100), enter"));
        assert_eq!(created["success"], json!(true));
        assert_eq!(created["mapping"]["start_key"], json!("end"));
        assert_eq!(created["mapping"]["keys"][0], json!({"key": "ctrl+c", "delay": 100}));
        assert!(created.get("kind").is_none());

        plane.create("second", "end", "a");
        let list = to_json(&plane.list());
        assert_eq!(list["stats"]["total"], json!(2));
        assert_eq!(list["mappings"]["end"].as_array().unwrap().len(), 2);
        assert_eq!(list["duplicate_info"]["end"]["count"], json!(2));
    }

    #[test]
    fn test_mutations_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymappings.json");
        {
            let plane = plane_with(MappingRegistry::open(&path).unwrap());
            assert!(plane.create("first", "end", "a(10)").success);
            assert!(plane.create("second", "end", "shift+b").success);
            assert!(plane.create("third", "home", "esc").success);
        }

        let reopened = plane_with(MappingRegistry::open(&path).unwrap());
        let list = reopened.list().data.unwrap();
        assert_eq!(list.stats.total, 3);
        assert_eq!(list.stats.enabled, 2);
        assert_eq!(list.mappings["end"][1].sequence_text(), "shift+b(0)");
    }

    #[test]
    fn test_failures_carry_kind() {
        let plane = plane();
        let bad_key = to_json(&plane.create("x", "end", "a, nosuchkey"));
        assert_eq!(bad_key["success"], json!(false));
        assert_eq!(bad_key["kind"], json!("parse_error"));

        let bad_trigger = to_json(&plane.create("x", "f1", "a"));
        assert_eq!(bad_trigger["kind"], json!("validation_error"));

        let missing = to_json(&plane.delete_by_id("nope"));
        assert_eq!(missing["kind"], json!("not_found"));

        let not_running = to_json(&plane.engine_stop());
        assert_eq!(not_running["kind"], json!("not_running"));
    }

    #[test]
    fn test_toggle_and_delete_by_trigger() {
        let plane = plane();
        plane.create("first", "delete", "a");
        let second = plane.create("second", "delete", "b");
        let second_id = second.data.unwrap().mapping.id;

        let toggled = plane.toggle_by_id(&second_id);
        assert!(toggled.success);
        assert!(toggled.data.unwrap().mapping.enabled);

        let first_id = plane.list().data.unwrap().mappings["delete"]
            .iter()
            .find(|m| m.name == "first")
            .map(|m| m.id.clone())
            .unwrap();
        let deleted = plane.delete_by_trigger("delete");
        assert!(deleted.success);
        let deleted = deleted.data.unwrap();
        assert_eq!(deleted.deleted_id, first_id);
        assert_eq!(deleted.deleted_name, "first");

        let remaining = plane.list().data.unwrap();
        assert_eq!(remaining.stats.total, 1);
        assert_eq!(remaining.mappings["delete"][0].id, second_id);

        let gone = plane.delete_by_id(&second_id);
        assert_eq!(gone.data.unwrap().deleted_id, second_id);
    }

    #[test]
    fn test_engine_lifecycle_through_plane() {
        let plane = plane();
        plane.create("x", "home", "x");

        let started = to_json(&plane.engine_start());
        assert_eq!(started["status"]["state"], json!("armed"));
        assert_eq!(to_json(&plane.engine_start())["kind"], json!("already_running"));

        let cleared = to_json(&plane.engine_clear());
        assert_eq!(cleared["removed"], json!(1));
        assert_eq!(to_json(&plane.engine_status())["status"]["running"], json!(false));
    }

    #[test]
    fn test_listings() {
        let plane = plane();
        let keys = to_json(&plane.available_keys());
        assert_eq!(keys["triggers"], json!(["delete", "end", "home"]));
        assert!(plane.combo_examples().data.unwrap().examples.len() > 3);
        assert_eq!(plane.recipes().data.unwrap().recipes.len(), 4);
    }

    #[test]
    fn test_macro_control() {
        let plane = plane();
        let unknown = to_json(&plane.macro_start("mode-Q", None, false));
        assert_eq!(unknown["kind"], json!("not_found"));

        let started = to_json(&plane.macro_start("mode-B-party", Some(1.0), false));
        assert_eq!(started["success"], json!(true));
        assert_eq!(started["status"]["mode"], json!("mode-B-party"));
        assert_eq!(to_json(&plane.macro_reset())["kind"], json!("conflict"));

        assert!(plane.macro_stop().success);
        assert!(plane.macro_reset().success);
        assert_eq!(to_json(&plane.macro_status())["status"]["running"], json!(false));
    }
}
