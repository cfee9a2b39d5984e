//! The master configuration store.
//!
//! Exclusive owner of the authoritative key/value mapping. Every mutation
//! appends to a changelist; the store's worker drains that changelist and
//! fans each `(key, value)` pair out to the update channel of every
//! snapshot. Fan-out never blocks: a full subscriber channel drops the
//! entry for that subscriber only, and the subscriber catches up later
//! because the store always holds the current value.

use crate::config::{ConfigSnapshot, is_reserved};
use crate::core::signal::StopSignal;
use crate::error::ConfigError;
use crate::logger::LogSender;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Capacity of each snapshot update channel. Sized generously so the
/// store only drops updates for a subscriber that has stopped refreshing.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// How long the store worker rests between changelist drains.
const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

struct Subscriber {
    tx: flume::Sender<(String, Value)>,
    dropped: u64,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Value>,
    version: u64,
    changelist: VecDeque<(String, Value)>,
    subscribers: Vec<Subscriber>,
}

pub struct ConfigStore {
    state: Mutex<State>,
    log: LogSender,
    path: Option<PathBuf>,
    started: AtomicBool,
}

impl ConfigStore {
    /// Create the store, optionally backed by a JSON file.
    ///
    /// An existing file is loaded (missing files are fine) and immediately
    /// written back, so a fresh deployment gets its file on first run.
    pub fn new(path: Option<PathBuf>, log: LogSender) -> Self {
        let store = Self {
            state: Mutex::new(State::default()),
            log,
            path,
            started: AtomicBool::new(false),
        };

        if let Some(path) = store.path.clone() {
            match store.load_from(&path) {
                Ok(true) => tracing::info!("config loaded from '{}'", path.display()),
                Ok(false) => tracing::info!("no config file at '{}', starting empty", path.display()),
                Err(e) => tracing::error!("config load failed: {e}"),
            }
            if let Err(e) = store.save_to(&path) {
                tracing::error!("initial config save failed: {e}");
            }
        }

        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("config store mutex poisoned")
    }

    /// Set `key` to `value`, queueing the change for fan-out.
    ///
    /// Reserved keys are stored but never fanned out or serialized.
    pub fn set(&self, key: &str, value: Value) {
        let mut state = self.lock();
        state.entries.insert(key.to_string(), value.clone());
        state.version += 1;
        if !is_reserved(key) {
            state.changelist.push_back((key.to_string(), value));
        }
    }

    /// Atomic test-and-set used by stages to register defaults without
    /// clobbering persisted values. Returns whether the key was inserted.
    pub fn create_if_unknown(&self, key: &str, value: Value) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            return false;
        }
        state.entries.insert(key.to_string(), value.clone());
        state.version += 1;
        if !is_reserved(key) {
            state.changelist.push_back((key.to_string(), value));
        }
        true
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().entries.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Monotonic mutation counter.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Hand out a sealed-on-use snapshot fed by its own update channel.
    ///
    /// Snapshots can only be created before the pipeline starts; the set
    /// of subscriber channels is fixed from then on.
    pub fn get_snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ConfigError::SnapshotAfterStart);
        }
        Ok(self.snapshot())
    }

    pub(crate) fn snapshot(&self) -> ConfigSnapshot {
        let mut state = self.lock();
        let (tx, rx) = flume::bounded(SUBSCRIBER_CAPACITY);
        state.subscribers.push(Subscriber { tx, dropped: 0 });

        let name = format!("C-{}", state.subscribers.len());
        let seed = state
            .entries
            .iter()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        ConfigSnapshot::new(name.clone(), seed, rx, self.log.named(name))
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Per-subscriber count of updates dropped on a full channel.
    pub fn fanout_drop_counts(&self) -> Vec<u64> {
        self.lock()
            .subscribers
            .iter()
            .map(|sub| sub.dropped)
            .collect()
    }

    /// Write the non-reserved entries to `path`, sorted, two-space indent.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let clean: BTreeMap<String, Value> = {
            let state = self.lock();
            state
                .entries
                .iter()
                .filter(|(key, _)| !is_reserved(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        let result = serde_json::to_vec_pretty(&clean)
            .map_err(ConfigError::from)
            .and_then(|mut bytes| {
                bytes.push(b'\n');
                std::fs::write(path, bytes).map_err(ConfigError::from)
            });

        if let Err(e) = &result {
            self.log
                .error(format!("failed to save config to '{}': {e}", path.display()));
        }

        result
    }

    /// Save to the configured backing file, if any.
    pub fn save(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    /// Merge the entries of the file at `path` into the mapping.
    ///
    /// Returns `Ok(false)` when the file does not exist. Any other I/O or
    /// parse failure is reported as an error event and leaves the mapping
    /// unchanged.
    pub fn load_from(&self, path: &Path) -> Result<bool, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                self.log
                    .error(format!("failed to read config '{}': {e}", path.display()));
                return Err(e.into());
            }
        };

        let parsed: BTreeMap<String, Value> = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.log
                    .error(format!("failed to parse config '{}': {e}", path.display()));
                return Err(e.into());
            }
        };

        let mut state = self.lock();
        for (key, value) in parsed {
            if is_reserved(&key) {
                continue;
            }
            state.entries.insert(key, value);
        }

        Ok(true)
    }

    /// Load from the configured backing file, if any.
    pub fn load(&self) -> Result<bool, ConfigError> {
        match &self.path {
            Some(path) => self.load_from(path),
            None => Ok(false),
        }
    }

    /// Worker loop: drain the changelist, fan updates out, rest.
    pub(crate) async fn run(self: std::sync::Arc<Self>, stop: StopSignal) {
        tracing::info!("config store worker started");

        while !stop.is_set() {
            self.fan_out();
            stop.wait(DRAIN_INTERVAL).await;
        }

        tracing::info!("config store worker stopped");
    }

    fn fan_out(&self) {
        let mut full_drops: Vec<(usize, String)> = Vec::new();

        {
            let mut state = self.lock();
            while let Some((key, value)) = state.changelist.pop_front() {
                for (index, sub) in state.subscribers.iter_mut().enumerate() {
                    match sub.tx.try_send((key.clone(), value.clone())) {
                        Ok(()) => {}
                        Err(flume::TrySendError::Full(_)) => {
                            sub.dropped += 1;
                            full_drops.push((index, key.clone()));
                        }
                        // A vanished subscriber just stops receiving.
                        Err(flume::TrySendError::Disconnected(_)) => {}
                    }
                }
            }
        }

        for (index, key) in full_drops {
            self.log.debug(format!(
                "subscriber {index} update channel full, dropped update for '{key}'"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> ConfigStore {
        let (tx, _rx) = flume::unbounded();
        ConfigStore::new(None, LogSender::new(tx, "CS"))
    }

    #[test]
    fn set_bumps_version_and_stores_value() {
        let store = test_store();
        assert_eq!(store.version(), 0);

        store.set("threshold", json!(42));
        assert_eq!(store.version(), 1);
        assert_eq!(store.get("threshold"), Some(json!(42)));
        assert!(store.has("threshold"));
        assert!(!store.has("missing"));
    }

    #[test]
    fn create_if_unknown_does_not_clobber() {
        let store = test_store();
        assert!(store.create_if_unknown("gain", json!(1.5)));
        assert!(!store.create_if_unknown("gain", json!(99.0)));
        assert_eq!(store.get("gain"), Some(json!(1.5)));
    }

    #[test]
    fn fan_out_reaches_every_snapshot_in_order() {
        let store = test_store();
        let mut first = store.get_snapshot().unwrap();
        let mut second = store.get_snapshot().unwrap();

        store.set("a", json!(1));
        store.set("a", json!(2));
        store.set("b", json!(true));
        store.fan_out();

        for snapshot in [&mut first, &mut second] {
            assert!(snapshot.refresh());
            assert_eq!(snapshot.get("a").unwrap(), &json!(2));
            assert_eq!(snapshot.get("b").unwrap(), &json!(true));
        }
    }

    #[test]
    fn reserved_keys_do_not_fan_out() {
        let store = test_store();
        let mut snapshot = store.get_snapshot().unwrap();

        store.set("_hidden", json!("metadata"));
        store.fan_out();

        assert!(!snapshot.refresh());
        assert!(!snapshot.has("_hidden"));
        // But the store itself holds the value.
        assert_eq!(store.get("_hidden"), Some(json!("metadata")));
    }

    #[test]
    fn full_subscriber_channel_drops_and_counts() {
        let store = test_store();
        let _snapshot = store.get_snapshot().unwrap();

        for i in 0..(SUBSCRIBER_CAPACITY + 10) {
            store.set("k", json!(i));
        }
        store.fan_out();

        let drops = store.fanout_drop_counts();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0], 10);
    }

    #[test]
    fn snapshot_after_start_is_rejected() {
        let store = test_store();
        store.mark_started();
        assert!(matches!(
            store.get_snapshot(),
            Err(ConfigError::SnapshotAfterStart)
        ));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");

        let store = test_store();
        store.set("b_key", json!([1, 2, 3]));
        store.set("a_key", json!("text"));
        store.set("_meta", json!("never written"));
        store.save_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("a_key"));
        assert!(!written.contains("_meta"));
        // Sorted keys: a_key serialises before b_key.
        assert!(written.find("a_key").unwrap() < written.find("b_key").unwrap());

        let restored = test_store();
        assert!(restored.load_from(&path).unwrap());
        assert_eq!(restored.get("a_key"), Some(json!("text")));
        assert_eq!(restored.get("b_key"), Some(json!([1, 2, 3])));
        assert_eq!(restored.get("_meta"), None);
    }

    #[test]
    fn load_of_missing_file_is_nonfatal() {
        let store = test_store();
        let loaded = store
            .load_from(Path::new("/nonexistent/brink-cfg.json"))
            .unwrap();
        assert!(!loaded);
    }

    #[test]
    fn load_of_malformed_file_leaves_mapping_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = test_store();
        store.set("kept", json!(1));
        assert!(store.load_from(&path).is_err());
        assert_eq!(store.get("kept"), Some(json!(1)));
    }

    #[test]
    fn backing_file_is_created_on_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let (tx, _rx) = flume::unbounded();

        let _store = ConfigStore::new(Some(path.clone()), LogSender::new(tx, "CS"));
        assert!(path.exists());
    }
}
