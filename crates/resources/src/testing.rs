//! Canned resource types and fixtures for tests.
//!
//! Production hosts register their own types; these exist so unit and
//! integration tests share one small plant model instead of each
//! reinventing probe resources.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use fabrik_model::MemoryStore;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::lifecycle::LifecyclePhase;
use crate::manager::ResourceManager;
use crate::reference::{ReferenceDescriptor, RelationKind};
use crate::registry::{TypeDescriptor, TypeRegistry, TypeRegistryBuilder};
use crate::resource::{ChangedSignal, Resource, ResourceContext};

/// Capability provided by every [`DriverResource`].
pub const DRIVING: Capability = Capability::new("driving");
/// Capability provided by stations that can weld.
pub const WELDING: Capability = Capability::new("welding");

/// Shared log of lifecycle hook invocations, for asserting call order
/// and counts across resources.
#[derive(Default, Clone)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Snapshot of all entries in record order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries starting with `prefix`.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with(prefix))
            .collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StationData {
    cycles: u64,
}

/// A station that logs its lifecycle hooks and persists a cycle counter
/// through the extension blob.
pub struct StationResource {
    log: CallLog,
    data: StationData,
    changed: Option<ChangedSignal>,
    name: String,
}

impl StationResource {
    /// Station logging into `log`.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            data: StationData::default(),
            changed: None,
            name: String::new(),
        }
    }

    /// Persisted cycle count.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.data.cycles
    }

    /// Bump the cycle counter and raise the changed-signal, like a
    /// driver event handler would.
    pub fn complete_cycle(&mut self) {
        self.data.cycles += 1;
        if let Some(changed) = &self.changed {
            changed.raise();
        }
    }
}

impl Resource for StationResource {
    fn on_initialize(&mut self, ctx: &ResourceContext) -> Result<()> {
        self.name = ctx.name().to_string();
        self.changed = Some(ctx.changed().clone());
        self.log.record(format!("initialize:{}", self.name));
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        self.log.record(format!("start:{}", self.name));
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        self.log.record(format!("stop:{}", self.name));
        Ok(())
    }

    fn on_dispose(&mut self) {
        self.log.record(format!("dispose:{}", self.name));
    }

    fn extension_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    fn restore(&mut self, data: serde_json::Value) -> Result<()> {
        self.data = serde_json::from_value(data)?;
        Ok(())
    }
}

/// A device driver; provides [`DRIVING`] and declares nothing else.
#[derive(Default)]
pub struct DriverResource;

impl Resource for DriverResource {}

/// A resource failing at a chosen lifecycle phase.
pub struct FlakyResource {
    fail_at: Option<LifecyclePhase>,
    name: String,
}

impl FlakyResource {
    /// Resource failing its hook at `phase`.
    #[must_use]
    pub fn failing_at(phase: LifecyclePhase) -> Self {
        Self {
            fail_at: Some(phase),
            name: String::new(),
        }
    }

    fn check(&self, phase: LifecyclePhase) -> Result<()> {
        if self.fail_at == Some(phase) {
            return Err(Error::no_match(format!(
                "{} deliberately failed {phase}",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for FlakyResource {
    fn default() -> Self {
        Self {
            fail_at: None,
            name: String::new(),
        }
    }
}

impl Resource for FlakyResource {
    fn on_initialize(&mut self, ctx: &ResourceContext) -> Result<()> {
        self.name = ctx.name().to_string();
        self.check(LifecyclePhase::Initialize)
    }

    fn on_start(&mut self) -> Result<()> {
        self.check(LifecyclePhase::Start)
    }

    fn on_stop(&mut self) -> Result<()> {
        self.check(LifecyclePhase::Stop)
    }
}

/// Reference name for a station's driver slot.
pub const DRIVER_REF: &str = "driver";
/// Reference name for a station's auto-saved module collection.
pub const MODULES_REF: &str = "modules";
/// Reference name for a station's manually-saved peer collection.
pub const PEERS_REF: &str = "peers";

/// The shared test type tree:
///
/// - `station` — [`StationResource`], single `driver` usage reference,
///   auto-save `modules` collection, plain `peers` collection
/// - `welding_station` — derives from `station`, adds [`WELDING`]
/// - `driver` — [`DriverResource`], provides [`DRIVING`]
/// - `group` — abstract structural base of `station`
#[must_use]
pub fn test_registry(log: &CallLog) -> Arc<TypeRegistry> {
    let station_log = log.clone();
    let welding_log = log.clone();
    Arc::new(
        TypeRegistryBuilder::new()
            .register(TypeDescriptor::new("group"))
            .register(
                TypeDescriptor::new("station")
                    .base("group")
                    .constructor(move || Box::new(StationResource::new(station_log.clone())))
                    .reference(ReferenceDescriptor::single(DRIVER_REF, RelationKind::Usage))
                    .reference(
                        ReferenceDescriptor::collection(MODULES_REF, RelationKind::Aggregation)
                            .auto_save(),
                    )
                    .reference(ReferenceDescriptor::collection(
                        PEERS_REF,
                        RelationKind::Usage,
                    )),
            )
            .register(
                TypeDescriptor::new("welding_station")
                    .base("station")
                    .capability(WELDING)
                    .constructor(move || Box::new(StationResource::new(welding_log.clone()))),
            )
            .register(
                TypeDescriptor::new("driver")
                    .capability(DRIVING)
                    .creates::<DriverResource>(),
            )
            .build()
            .expect("test registry is well-formed"),
    )
}

/// A manager over the shared test registry and a fresh in-memory store.
pub struct TestRig {
    /// Lifecycle call log shared by all station instances.
    pub log: CallLog,
    /// The in-memory store backing the manager.
    pub store: Arc<MemoryStore>,
    /// The manager under test.
    pub manager: Arc<ResourceManager>,
}

impl TestRig {
    /// Fresh rig: empty store, empty graph.
    #[must_use]
    pub fn new() -> Self {
        let log = CallLog::new();
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ResourceManager::new(
            test_registry(&log),
            Arc::clone(&store) as Arc<dyn fabrik_model::ResourceStore>,
        ));
        Self {
            log,
            store,
            manager,
        }
    }

    /// A second manager over the same store, as after a process restart.
    #[must_use]
    pub fn reboot(&self) -> Self {
        let log = CallLog::new();
        let manager = Arc::new(ResourceManager::new(
            test_registry(&log),
            Arc::clone(&self.store) as Arc<dyn fabrik_model::ResourceStore>,
        ));
        Self {
            log,
            store: Arc::clone(&self.store),
            manager,
        }
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}
