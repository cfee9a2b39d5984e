//! Per-stage configuration snapshots.

use crate::config::is_reserved;
use crate::error::ConfigError;
use crate::logger::LogSender;
use serde_json::Value;
use std::collections::HashMap;

/// Updates applied per `refresh` call are capped to bound worst-case
/// latency of a single tick.
pub const MAX_UPDATES_PER_REFRESH: usize = 1000;

/// A read-through copy of the master configuration owned by one stage.
///
/// The snapshot is kept current by draining its update channel at the top
/// of every tick. Once sealed (which happens when the snapshot is handed
/// to a worker), `refresh` is the only way its contents change; direct
/// writes are rejected.
pub struct ConfigSnapshot {
    name: String,
    entries: HashMap<String, Value>,
    updates: flume::Receiver<(String, Value)>,
    sealed: bool,
    log: LogSender,
}

impl ConfigSnapshot {
    pub(crate) fn new(
        name: String,
        entries: HashMap<String, Value>,
        updates: flume::Receiver<(String, Value)>,
        log: LogSender,
    ) -> Self {
        Self {
            name,
            entries,
            updates,
            sealed: false,
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain pending updates into the local mapping.
    ///
    /// At most [`MAX_UPDATES_PER_REFRESH`] entries are applied per call.
    /// Reserved keys are skipped. Returns whether anything was applied.
    pub fn refresh(&mut self) -> bool {
        let mut applied = false;

        for _ in 0..MAX_UPDATES_PER_REFRESH {
            match self.updates.try_recv() {
                Ok((key, value)) => {
                    if is_reserved(&key) {
                        self.log.debug(format!("skipping reserved key '{key}'"));
                        continue;
                    }
                    self.log.debug(format!("updated : {key}: {value}"));
                    self.entries.insert(key, value);
                    applied = true;
                }
                Err(_) => break,
            }
        }

        applied
    }

    /// Look up a key. Unknown keys are an error, not a silent default.
    pub fn get(&self, key: &str) -> Result<&Value, ConfigError> {
        self.entries.get(key).ok_or_else(|| ConfigError::KeyMissing {
            key: key.to_string(),
        })
    }

    /// Typed lookup via serde.
    pub fn get_as<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.get(key)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Lenient typed lookup: missing keys and type mismatches fall back to
    /// the default. The usual accessor for stage tunables.
    pub fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: serde::de::DeserializeOwned,
    {
        self.entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct write, only valid before the snapshot is sealed.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        if self.sealed {
            return Err(ConfigError::ReadOnly {
                name: self.name.clone(),
            });
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Mark the snapshot immutable from the owner's perspective.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
