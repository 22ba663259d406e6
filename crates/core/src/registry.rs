//! Mapping Registry
//!
//! Canonical storage of user mappings, bucketed by trigger key.
//!
//! Several mappings may share a trigger but at most one of them is enabled.
//! Every mutation clones the buckets, applies the change, persists the result
//! and only then publishes a fresh [`ActiveTriggerTable`]; a failed write
//! restores the clone so memory and disk never disagree.
//!
//! The dispatcher only ever reads the active table through
//! [`MappingRegistry::active_mapping`], which takes a short reader lock on an
//! `Arc` snapshot.

use crate::error::{Error, Result};
use crate::keys::{self, KeyCode, KeyToken, MappedStep};
use crate::mapping::Mapping;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File name of the mapping store inside the data directory
pub const MAPPINGS_FILE: &str = "keymappings.json";

/// The enabled mapping of a trigger, if any
#[derive(Debug, Clone, Copy)]
pub enum ActiveSlot<'a> {
    Vacant,
    Occupied(&'a Mapping),
}

/// All mappings sharing one trigger, in insertion order
#[derive(Debug, Clone, Default)]
struct TriggerBucket {
    mappings: Vec<Mapping>,
}

impl TriggerBucket {
    fn active(&self) -> ActiveSlot<'_> {
        match self.mappings.iter().find(|m| m.enabled) {
            Some(mapping) => ActiveSlot::Occupied(mapping),
            None => ActiveSlot::Vacant,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.mappings.iter().position(|m| m.id == id)
    }

    /// Append; the newcomer is disabled when the slot is already taken
    fn push(&mut self, mut mapping: Mapping) -> &Mapping {
        if matches!(self.active(), ActiveSlot::Occupied(_)) {
            mapping.enabled = false;
        }
        self.mappings.push(mapping);
        &self.mappings[self.mappings.len() - 1]
    }

    /// Enable the mapping at `index` and disable every sibling
    fn activate(&mut self, index: usize) {
        for (i, mapping) in self.mappings.iter_mut().enumerate() {
            mapping.enabled = i == index;
        }
    }

    fn toggle(&mut self, index: usize) -> &Mapping {
        if self.mappings[index].enabled {
            self.mappings[index].enabled = false;
        } else {
            self.activate(index);
        }
        &self.mappings[index]
    }

    /// Keep only the first enabled mapping; returns how many were disabled
    fn normalise(&mut self) -> usize {
        let mut seen = false;
        let mut disabled = 0;
        for mapping in self.mappings.iter_mut().filter(|m| m.enabled) {
            if seen {
                mapping.enabled = false;
                disabled += 1;
            }
            seen = true;
        }
        disabled
    }

    fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

type Buckets = BTreeMap<KeyCode, TriggerBucket>;

/// Raw code -> enabled mapping, read on the hook hot path
#[derive(Debug, Default)]
pub struct ActiveTriggerTable {
    entries: HashMap<u16, Arc<Mapping>>,
}

impl ActiveTriggerTable {
    fn build(buckets: &Buckets) -> Self {
        let mut entries = HashMap::new();
        for (trigger, bucket) in buckets {
            let ActiveSlot::Occupied(mapping) = bucket.active() else {
                continue;
            };
            if let Some(raw) = keys::trigger_raw_code(&KeyToken::Simple(*trigger)) {
                entries.insert(raw, Arc::new(mapping.clone()));
            }
        }
        Self { entries }
    }

    pub fn get(&self, raw_code: u16) -> Option<&Arc<Mapping>> {
        self.entries.get(&raw_code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw_codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.entries.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

/// Registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub unique_triggers: usize,
    pub duplicate_triggers: usize,
    pub running: bool,
}

/// Per-trigger view of shared triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateInfo {
    pub count: usize,
    pub ids: Vec<String>,
    pub active_id: Option<String>,
}

/// Thread-safe mapping store
pub struct MappingRegistry {
    buckets: RwLock<Buckets>,
    active: RwLock<Arc<ActiveTriggerTable>>,
    store: Option<PathBuf>,
    running: AtomicBool,
}

impl MappingRegistry {
    /// Registry that never touches disk
    pub fn in_memory() -> Self {
        Self::with_buckets(Buckets::new(), None)
    }

    /// Load the registry from `path`; a missing file yields an empty registry
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let buckets = load_buckets(&path)?;
        let registry = Self::with_buckets(buckets, Some(path));
        let stats = registry.stats();
        info!(
            "Loaded {} mappings ({} enabled) across {} triggers",
            stats.total, stats.enabled, stats.unique_triggers
        );
        Ok(registry)
    }

    fn with_buckets(buckets: Buckets, store: Option<PathBuf>) -> Self {
        let table = ActiveTriggerTable::build(&buckets);
        Self {
            buckets: RwLock::new(buckets),
            active: RwLock::new(Arc::new(table)),
            store,
            running: AtomicBool::new(false),
        }
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    /// Add a mapping; it starts disabled if its trigger already has an enabled one
    pub fn add(&self, name: &str, trigger: &str, steps: Vec<MappedStep>) -> Result<Mapping> {
        let trigger = keys::parse_trigger(trigger)?;
        let mapping = Mapping::new(name, trigger, steps)?;

        let stored = self.mutate(|buckets| {
            Ok(buckets.entry(trigger).or_default().push(mapping).clone())
        })?;
        info!(
            "Added mapping '{}' ({}) on {} enabled={}",
            stored.name, stored.id, trigger, stored.enabled
        );
        Ok(stored)
    }

    /// Replace name, trigger and steps of an existing mapping
    pub fn update_by_id(
        &self,
        id: &str,
        name: &str,
        trigger: &str,
        steps: Vec<MappedStep>,
    ) -> Result<Mapping> {
        let trigger = keys::parse_trigger(trigger)?;
        crate::mapping::validate_parts(name, trigger, &steps)?;

        let updated = self.mutate(|buckets| {
            let (old_trigger, index) = locate(buckets, id)?;
            let current = buckets[&old_trigger].mappings[index].clone();
            let mut revised = current.revise(name, trigger, steps)?;

            if old_trigger == trigger {
                if let Some(bucket) = buckets.get_mut(&trigger) {
                    bucket.mappings[index] = revised.clone();
                }
                return Ok(revised);
            }

            if let Some(bucket) = buckets.get_mut(&old_trigger) {
                bucket.mappings.remove(index);
            }
            let target = buckets.entry(trigger).or_default();
            if matches!(target.active(), ActiveSlot::Occupied(_)) {
                revised.enabled = false;
            }
            target.mappings.push(revised.clone());
            Ok(revised)
        })?;
        info!("Updated mapping '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    /// Remove by id; siblings are never auto-enabled
    pub fn remove_by_id(&self, id: &str) -> Result<Mapping> {
        let removed = self.mutate(|buckets| {
            let (trigger, index) = locate(buckets, id)?;
            let bucket = buckets
                .get_mut(&trigger)
                .ok_or_else(|| Error::NotFound(format!("mapping '{}'", id)))?;
            Ok(bucket.mappings.remove(index))
        })?;
        info!("Removed mapping '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    /// Remove the first mapping registered on `trigger`
    pub fn remove_by_trigger(&self, trigger: &str) -> Result<Mapping> {
        let trigger = keys::parse_trigger(trigger)?;
        let id = self.first_id_on(trigger)?;
        self.remove_by_id(&id)
    }

    /// Flip `enabled`; enabling disables every sibling on the same trigger
    pub fn toggle_by_id(&self, id: &str) -> Result<Mapping> {
        let toggled = self.mutate(|buckets| {
            let (trigger, index) = locate(buckets, id)?;
            let bucket = buckets
                .get_mut(&trigger)
                .ok_or_else(|| Error::NotFound(format!("mapping '{}'", id)))?;
            Ok(bucket.toggle(index).clone())
        })?;
        info!(
            "Toggled mapping '{}' ({}) enabled={}",
            toggled.name, toggled.id, toggled.enabled
        );
        Ok(toggled)
    }

    /// Toggle the first mapping registered on `trigger`
    pub fn toggle_by_trigger(&self, trigger: &str) -> Result<Mapping> {
        let trigger = keys::parse_trigger(trigger)?;
        let id = self.first_id_on(trigger)?;
        self.toggle_by_id(&id)
    }

    /// Remove every mapping
    pub fn clear(&self) -> Result<usize> {
        let count = self.mutate(|buckets| {
            let count = buckets.values().map(|b| b.mappings.len()).sum();
            buckets.clear();
            Ok(count)
        })?;
        info!("Cleared {} mappings", count);
        Ok(count)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Mapping> {
        let buckets = self.buckets.read();
        buckets
            .values()
            .flat_map(|b| b.mappings.iter())
            .find(|m| m.id == id)
            .cloned()
    }

    /// Deep copy keyed by trigger name
    pub fn all(&self) -> BTreeMap<String, Vec<Mapping>> {
        self.buckets
            .read()
            .iter()
            .map(|(trigger, bucket)| (trigger.name().to_string(), bucket.mappings.clone()))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let buckets = self.buckets.read();
        let mut stats = RegistryStats {
            running: self.is_running(),
            ..RegistryStats::default()
        };
        for bucket in buckets.values() {
            stats.total += bucket.mappings.len();
            stats.enabled += bucket.mappings.iter().filter(|m| m.enabled).count();
            stats.unique_triggers += 1;
            if bucket.mappings.len() > 1 {
                stats.duplicate_triggers += 1;
            }
        }
        stats.disabled = stats.total - stats.enabled;
        stats
    }

    /// Triggers with more than one mapping
    pub fn duplicate_info(&self) -> BTreeMap<String, DuplicateInfo> {
        self.buckets
            .read()
            .iter()
            .filter(|(_, bucket)| bucket.mappings.len() > 1)
            .map(|(trigger, bucket)| {
                let active_id = match bucket.active() {
                    ActiveSlot::Occupied(m) => Some(m.id.clone()),
                    ActiveSlot::Vacant => None,
                };
                let info = DuplicateInfo {
                    count: bucket.mappings.len(),
                    ids: bucket.mappings.iter().map(|m| m.id.clone()).collect(),
                    active_id,
                };
                (trigger.name().to_string(), info)
            })
            .collect()
    }

    /// Recompute and publish the active table from the current buckets
    pub fn rebuild_active_table(&self) {
        let buckets = self.buckets.read();
        self.publish(&buckets);
    }

    /// Current snapshot of the active table
    pub fn active_table(&self) -> Arc<ActiveTriggerTable> {
        Arc::clone(&self.active.read())
    }

    /// Enabled mapping for a raw key code
    pub fn active_mapping(&self, raw_code: u16) -> Option<Arc<Mapping>> {
        self.active.read().get(raw_code).cloned()
    }

    /// Write the current contents to the store in keyed form
    pub fn save(&self) -> Result<()> {
        let buckets = self.buckets.read();
        self.persist(&buckets)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn first_id_on(&self, trigger: KeyCode) -> Result<String> {
        self.buckets
            .read()
            .get(&trigger)
            .and_then(|bucket| bucket.mappings.first())
            .map(|m| m.id.clone())
            .ok_or_else(|| Error::NotFound(format!("no mapping on trigger '{}'", trigger)))
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut Buckets) -> Result<T>) -> Result<T> {
        let mut buckets = self.buckets.write();
        let snapshot = buckets.clone();

        let value = match change(&mut buckets) {
            Ok(value) => value,
            Err(e) => {
                *buckets = snapshot;
                return Err(e);
            }
        };
        buckets.retain(|_, bucket| !bucket.is_empty());

        if let Err(e) = self.persist(&buckets) {
            warn!("Rolling back mapping change: {}", e);
            *buckets = snapshot;
            return Err(e);
        }

        self.publish(&buckets);
        Ok(value)
    }

    fn publish(&self, buckets: &Buckets) {
        let table = Arc::new(ActiveTriggerTable::build(buckets));
        debug!("Publishing active table with {} triggers", table.len());
        *self.active.write() = table;
    }

    fn persist(&self, buckets: &Buckets) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };

        let document: BTreeMap<&str, &Vec<Mapping>> = buckets
            .iter()
            .filter(|(trigger, _)| trigger.is_trigger())
            .map(|(trigger, bucket)| (trigger.name(), &bucket.mappings))
            .collect();
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        debug!("Saved mappings to {}", path.display());
        Ok(())
    }
}

fn locate(buckets: &Buckets, id: &str) -> Result<(KeyCode, usize)> {
    buckets
        .iter()
        .find_map(|(trigger, bucket)| bucket.position(id).map(|i| (*trigger, i)))
        .ok_or_else(|| Error::NotFound(format!("mapping '{}'", id)))
}

/// Read the mapping file, accepting the keyed object and the legacy flat list
fn load_buckets(path: &Path) -> Result<Buckets> {
    let mut buckets = Buckets::new();
    if !path.exists() {
        debug!("No mapping file at {}, starting empty", path.display());
        return Ok(buckets);
    }

    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(buckets);
    }

    match serde_json::from_str::<Value>(&contents)? {
        Value::Object(document) => {
            for (trigger_name, records) in document {
                let trigger = match keys::parse_trigger(&trigger_name) {
                    Ok(trigger) => trigger,
                    Err(e) => {
                        warn!("Dropping mappings under '{}': {}", trigger_name, e);
                        continue;
                    }
                };
                let Value::Array(records) = records else {
                    warn!("Dropping '{}': expected a list of mappings", trigger_name);
                    continue;
                };
                for record in records {
                    if let Some(mut mapping) = decode_record(record) {
                        mapping.trigger = trigger;
                        buckets.entry(trigger).or_default().mappings.push(mapping);
                    }
                }
            }
        }
        Value::Array(records) => {
            info!("Mapping file uses the legacy flat layout, it will be rewritten on next save");
            for record in records {
                if let Some(mapping) = decode_record(record) {
                    buckets.entry(mapping.trigger).or_default().mappings.push(mapping);
                }
            }
        }
        _ => return Err(Error::Persist("unrecognised mapping file layout".into())),
    }

    for (trigger, bucket) in buckets.iter_mut() {
        let disabled = bucket.normalise();
        if disabled > 0 {
            warn!("Disabled {} extra enabled mappings on '{}'", disabled, trigger);
        }
    }
    Ok(buckets)
}

fn decode_record(record: Value) -> Option<Mapping> {
    match serde_json::from_value::<Mapping>(record) {
        Ok(mapping) => Some(mapping),
        Err(e) => {
            warn!("Dropping invalid mapping record: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::parse_sequence;

    fn steps(text: &str) -> Vec<MappedStep> {
        parse_sequence(text).unwrap()
    }

    /// Exactly one enabled mapping per trigger in the table, none disabled
    fn assert_invariants(registry: &MappingRegistry) {
        let all = registry.all();
        let table = registry.active_table();
        let mut enabled_total = 0;
        for (trigger, mappings) in &all {
            let enabled: Vec<_> = mappings.iter().filter(|m| m.enabled).collect();
            assert!(enabled.len() <= 1, "trigger {} has {} enabled", trigger, enabled.len());
            let raw = KeyCode::from_name(trigger).unwrap().vk();
            match enabled.first() {
                Some(m) => assert_eq!(table.get(raw).unwrap().id, m.id),
                None => assert!(table.get(raw).is_none()),
            }
            enabled_total += enabled.len();
        }
        assert_eq!(table.len(), enabled_total);
    }

    #[test]
    fn test_add_second_mapping_is_disabled() {
        let registry = MappingRegistry::in_memory();
        let m1 = registry.add("First", "delete", steps("a")).unwrap();
        let m2 = registry.add("Second", "delete", steps("b")).unwrap();
        assert!(m1.enabled);
        assert!(!m2.enabled);
        assert_eq!(registry.active_mapping(46).unwrap().id, m1.id);
        assert_invariants(&registry);
    }

    #[test]
    fn test_toggle_enforces_exclusivity() {
        let registry = MappingRegistry::in_memory();
        let m1 = registry.add("First", "delete", steps("a")).unwrap();
        let m2 = registry.add("Second", "delete", steps("b")).unwrap();

        let toggled = registry.toggle_by_id(&m2.id).unwrap();
        assert!(toggled.enabled);
        assert!(!registry.get_by_id(&m1.id).unwrap().enabled);
        assert_eq!(registry.active_mapping(46).unwrap().id, m2.id);
        assert_invariants(&registry);

        let toggled = registry.toggle_by_id(&m2.id).unwrap();
        assert!(!toggled.enabled);
        assert!(registry.active_mapping(46).is_none());
        assert_invariants(&registry);
    }

    #[test]
    fn test_validation_leaves_registry_unchanged() {
        let registry = MappingRegistry::in_memory();
        assert!(matches!(
            registry.add("x", "f5", steps("a")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            registry.add("x", "bogus", steps("a")),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            registry.add("", "end", steps("a")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            registry.add("x", "end", Vec::new()),
            Err(Error::Validation(_))
        ));
        assert_eq!(registry.stats().total, 0);
    }

    #[test]
    fn test_update_moves_bucket_and_respects_enabled() {
        let registry = MappingRegistry::in_memory();
        let on_end = registry.add("End", "end", steps("a")).unwrap();
        let on_home = registry.add("Home", "home", steps("b")).unwrap();

        let moved = registry
            .update_by_id(&on_home.id, "Moved", "end", steps("c(10)"))
            .unwrap();
        assert_eq!(moved.trigger, KeyCode::End);
        assert!(!moved.enabled);
        assert_eq!(moved.created_at, on_home.created_at);
        assert!(registry.all().get("home").is_none());
        assert_eq!(registry.active_mapping(35).unwrap().id, on_end.id);

        let same = registry
            .update_by_id(&on_end.id, "Renamed", "end", steps("d"))
            .unwrap();
        assert!(same.enabled);
        assert_eq!(registry.active_mapping(35).unwrap().name, "Renamed");
        assert_invariants(&registry);

        assert!(matches!(
            registry.update_by_id("missing", "x", "end", steps("a")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_does_not_auto_enable_sibling() {
        let registry = MappingRegistry::in_memory();
        let m1 = registry.add("First", "end", steps("a")).unwrap();
        let m2 = registry.add("Second", "end", steps("b")).unwrap();

        let removed = registry.remove_by_id(&m1.id).unwrap();
        assert_eq!(removed.id, m1.id);
        assert_eq!(removed.name, "First");
        assert!(!registry.get_by_id(&m2.id).unwrap().enabled);
        assert!(registry.active_mapping(35).is_none());
        assert!(matches!(registry.remove_by_id(&m1.id), Err(Error::NotFound(_))));
        assert_invariants(&registry);
    }

    #[test]
    fn test_trigger_addressed_operations_use_first_mapping() {
        let registry = MappingRegistry::in_memory();
        let m1 = registry.add("First", "home", steps("a")).unwrap();
        registry.add("Second", "home", steps("b")).unwrap();

        let toggled = registry.toggle_by_trigger("home").unwrap();
        assert_eq!(toggled.id, m1.id);
        assert!(!toggled.enabled);

        assert_eq!(registry.remove_by_trigger("HOME").unwrap().name, "First");
        assert_eq!(registry.stats().total, 1);
        assert!(matches!(registry.remove_by_trigger("delete"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_stats_and_duplicate_info() {
        let registry = MappingRegistry::in_memory();
        let m1 = registry.add("A", "delete", steps("a")).unwrap();
        let m2 = registry.add("B", "delete", steps("b")).unwrap();
        registry.add("C", "end", steps("c")).unwrap();
        registry.set_running(true);

        let stats = registry.stats();
        assert_eq!(
            stats,
            RegistryStats {
                total: 3,
                enabled: 2,
                disabled: 1,
                unique_triggers: 2,
                duplicate_triggers: 1,
                running: true,
            }
        );

        let duplicates = registry.duplicate_info();
        assert_eq!(duplicates.len(), 1);
        let info = &duplicates["delete"];
        assert_eq!(info.count, 2);
        assert_eq!(info.ids, vec![m1.id.clone(), m2.id]);
        assert_eq!(info.active_id, Some(m1.id));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MAPPINGS_FILE);

        let registry = MappingRegistry::open(&path).unwrap();
        let m1 = registry.add("One", "delete", steps("a(50), b")).unwrap();
        let m2 = registry.add("Two", "delete", steps("ctrl+shift+n")).unwrap();
        let m3 = registry.add("Three", "home", steps("f5(100)")).unwrap();
        let before = registry.all();
        drop(registry);

        let reloaded = MappingRegistry::open(&path).unwrap();
        assert_eq!(reloaded.all(), before);
        assert!(reloaded.get_by_id(&m1.id).unwrap().enabled);
        assert!(!reloaded.get_by_id(&m2.id).unwrap().enabled);
        assert!(reloaded.get_by_id(&m3.id).unwrap().enabled);
        assert_invariants(&reloaded);
    }

    #[test]
    fn test_legacy_flat_file_is_migrated_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MAPPINGS_FILE);
        fs::write(
            &path,
            r#"[
              {"id":"legacy_1","name":"Old End","start_key":"end","keys":[{"key":"a","delay":100}],
               "enabled":true,"created_at":"2024-05-01T10:00:00+09:00","updated_at":"2024-05-01T10:00:00+09:00"},
              {"id":"legacy_2","name":"Also End","start_key":"end","keys":[{"key":"b","delay":0}],"enabled":true},
              {"id":"legacy_3","name":"Bad","start_key":"f9","keys":[{"key":"c","delay":0}],"enabled":true}
            ]"#,
        )
        .unwrap();

        let registry = MappingRegistry::open(&path).unwrap();
        let all = registry.all();
        assert_eq!(all["end"].len(), 2);
        assert!(all["end"][0].enabled);
        assert!(!all["end"][1].enabled);
        assert_eq!(registry.stats().total, 2);

        registry.save().unwrap();
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.is_object());
        assert_eq!(value["end"][0]["id"], "legacy_1");
    }

    #[test]
    fn test_keyed_file_drops_invalid_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MAPPINGS_FILE);
        fs::write(
            &path,
            r#"{"pageup":[{"id":"x","name":"X","start_key":"pageup","keys":[{"key":"a","delay":0}],"enabled":true}],
                "home":[{"id":"h","name":"H","start_key":"home","keys":[{"key":"q","delay":5}],"enabled":true}]}"#,
        )
        .unwrap();

        let registry = MappingRegistry::open(&path).unwrap();
        assert_eq!(registry.stats().total, 1);
        assert_eq!(registry.active_mapping(36).unwrap().id, "h");
    }

    #[test]
    fn test_corrupt_file_is_a_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MAPPINGS_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(MappingRegistry::open(&path), Err(Error::Persist(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let registry = MappingRegistry::open(blocker.join(MAPPINGS_FILE)).unwrap();
        assert!(matches!(
            registry.add("One", "end", steps("a")),
            Err(Error::Persist(_))
        ));
        assert_eq!(registry.stats().total, 0);
        assert!(registry.active_table().is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let registry = MappingRegistry::in_memory();
        registry.add("A", "end", steps("a")).unwrap();
        registry.add("B", "home", steps("b")).unwrap();
        assert_eq!(registry.clear().unwrap(), 2);
        assert!(registry.all().is_empty());
        assert!(registry.active_table().is_empty());
    }
}
