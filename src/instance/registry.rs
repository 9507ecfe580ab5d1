//! In-memory table of running and recently exited instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::models::{Instance, InstanceState};

/// Authoritative registry of instances, keyed by pid.
///
/// The map serializes writes per key, so `register` and `mark_exited` for
/// the same pid never race. Iteration always goes through [`all`], which
/// clones entries out rather than exposing the live map.
///
/// [`all`]: InstanceRegistry::all
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    entries: Arc<DashMap<u32, Instance>>,
    generation: Arc<AtomicU64>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh generation marker for a spawn attempt.
    ///
    /// The OS may recycle a pid after reap; the generation stamped into the
    /// entry lets a late exit notification for the old process be told apart
    /// from the new occupant of the same pid.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a new entry. Replaces any exited entry left under the same pid.
    pub fn register(&self, instance: Instance) {
        let pid = instance.pid;
        if let Some(previous) = self.entries.insert(pid, instance)
            && previous.state.is_live()
        {
            // Should not happen: a live process and a new spawn can't share a pid
            warn!(pid, "Replaced live registry entry on register");
        }
        debug!(pid, "Registered instance");
    }

    /// Flip a freshly registered entry to `Running`.
    pub fn set_running(&self, pid: u32) {
        if let Some(mut entry) = self.entries.get_mut(&pid)
            && entry.state == InstanceState::Starting
        {
            entry.state = InstanceState::Running;
        }
    }

    /// Transition a live entry to `Stopping`.
    ///
    /// Returns the state the entry was in before the call, or `None` if the
    /// pid is unknown. Calling this on an already stopping or exited entry
    /// changes nothing.
    pub fn set_stopping(&self, pid: u32) -> Option<InstanceState> {
        let mut entry = self.entries.get_mut(&pid)?;
        let previous = entry.state;
        if previous.is_live() && !previous.is_stopping() {
            entry.state = InstanceState::Stopping;
        }
        Some(previous)
    }

    /// Record that the process behind an entry has exited.
    ///
    /// Idempotent: once an entry is `Exited`, later calls leave the recorded
    /// exit code alone. A mismatched generation means the pid has been
    /// recycled for a newer instance and the notification is stale; it is
    /// dropped without touching the entry.
    pub fn mark_exited(&self, pid: u32, generation: u64, exit_code: i32) {
        let Some(mut entry) = self.entries.get_mut(&pid) else {
            warn!(pid, "Exit notification for unknown pid");
            return;
        };

        if entry.generation != generation {
            debug!(pid, generation, "Dropping stale exit notification");
            return;
        }

        if entry.state.is_live() {
            entry.state = InstanceState::Exited { exit_code };
            debug!(pid, exit_code, "Instance exited");
        }
    }

    pub fn get(&self, pid: u32) -> Option<Instance> {
        self.entries.get(&pid).map(|entry| entry.value().clone())
    }

    /// Snapshot of all entries, oldest first.
    pub fn all(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        instances.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.pid.cmp(&b.pid)));
        instances
    }

    /// Most recently started instance for a configuration, live or exited.
    pub fn most_recent_for_configuration(&self, configuration_id: i64) -> Option<Instance> {
        self.all()
            .into_iter()
            .filter(|instance| instance.configuration_id == configuration_id)
            .next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample(registry: &InstanceRegistry, pid: u32, configuration_id: i64) -> Instance {
        Instance {
            pid,
            generation: registry.next_generation(),
            name: format!("instance-{pid}"),
            configuration_id,
            started_at: Utc::now(),
            state: InstanceState::Running,
            log_file: format!("instance-{pid}.log"),
            work_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = InstanceRegistry::new();
        registry.register(sample(&registry, 100, 1));

        let found = registry.get(100).unwrap();
        assert_eq!(found.name, "instance-100");
        assert!(registry.get(999).is_none());
    }

    #[test]
    fn test_mark_exited_is_idempotent() {
        let registry = InstanceRegistry::new();
        let instance = sample(&registry, 200, 1);
        let generation = instance.generation;
        registry.register(instance);

        registry.mark_exited(200, generation, 0);
        registry.mark_exited(200, generation, 137);

        // The second call must not overwrite the recorded exit code
        assert_eq!(
            registry.get(200).unwrap().state,
            InstanceState::Exited { exit_code: 0 }
        );
    }

    #[test]
    fn test_stale_generation_ignored() {
        let registry = InstanceRegistry::new();
        let old = sample(&registry, 300, 1);
        let old_generation = old.generation;
        registry.register(old);
        registry.mark_exited(300, old_generation, 0);

        // Pid recycled for a new instance
        let new = sample(&registry, 300, 2);
        registry.register(new);

        registry.mark_exited(300, old_generation, 1);
        assert!(registry.get(300).unwrap().state.is_live());
    }

    #[test]
    fn test_set_stopping_transitions_once() {
        let registry = InstanceRegistry::new();
        let instance = sample(&registry, 400, 1);
        let generation = instance.generation;
        registry.register(instance);

        assert_eq!(registry.set_stopping(400), Some(InstanceState::Running));
        assert_eq!(registry.set_stopping(400), Some(InstanceState::Stopping));
        assert!(registry.set_stopping(999).is_none());

        registry.mark_exited(400, generation, 0);
        assert_eq!(
            registry.set_stopping(400),
            Some(InstanceState::Exited { exit_code: 0 })
        );
    }

    #[test]
    fn test_all_is_a_deduplicated_snapshot() {
        let registry = InstanceRegistry::new();
        for pid in [10, 11, 12] {
            registry.register(sample(&registry, pid, 1));
        }

        let snapshot = registry.all();
        assert_eq!(snapshot.len(), 3);

        let mut pids: Vec<u32> = snapshot.iter().map(|i| i.pid).collect();
        pids.dedup();
        assert_eq!(pids.len(), 3);
    }

    #[test]
    fn test_most_recent_for_configuration() {
        let registry = InstanceRegistry::new();
        registry.register(sample(&registry, 20, 7));
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.register(sample(&registry, 21, 7));
        registry.register(sample(&registry, 22, 8));

        let recent = registry.most_recent_for_configuration(7).unwrap();
        assert_eq!(recent.pid, 21);
        assert!(registry.most_recent_for_configuration(99).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = InstanceRegistry::new();
        let mut handles = Vec::new();

        for pid in 1000..1016u32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let instance = sample(&registry, pid, 1);
                registry.register(instance);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.all().len(), 16);
    }
}
