use crate::checks::CheckSuspendResult;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Registration record for one third-party policy unit. Supplied explicitly
/// when the plugin is registered; the GUID is the only reliable identity,
/// display names may collide between unrelated plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdentity {
    pub name: String,
    pub version: String,
    pub guid: Uuid,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin failure: {0}")]
    Plugin(String),
    #[error("invalid lifecycle transition: {event} while {state:?}")]
    Lifecycle {
        state: LifecycleState,
        event: &'static str,
    },
    #[error("failed to access plugin settings: {0}")]
    Settings(#[from] std::io::Error),
    #[error("failed to decode plugin settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}

/// Per-plugin opaque settings persistence, keyed by GUID.
pub trait PluginSettingsStore: Send + Sync {
    fn load(&self, guid: Uuid) -> Result<Option<Value>, PluginError>;
    fn save(&self, guid: Uuid, value: &Value) -> Result<(), PluginError>;
}

/// Stores each plugin's settings blob as JSON under a GUID-qualified
/// directory name, so two plugins sharing a display name can never clobber
/// each other.
pub struct FilePluginSettingsStore {
    root: PathBuf,
}

impl FilePluginSettingsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn settings_path(&self, guid: Uuid) -> PathBuf {
        self.root.join(format!("plugin-{guid}")).join("settings.json")
    }
}

impl PluginSettingsStore for FilePluginSettingsStore {
    fn load(&self, guid: Uuid) -> Result<Option<Value>, PluginError> {
        let path = self.settings_path(guid);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, guid: Uuid, value: &Value) -> Result<(), PluginError> {
        let path = self.settings_path(guid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }
}

/// Handle the plugin keeps for its persisted settings. The blob is opaque to
/// the engine and loaded lazily on first access; plugins that never touch
/// their settings cost no IO.
#[derive(Clone)]
pub struct PluginSettingsHandle {
    guid: Uuid,
    store: Arc<dyn PluginSettingsStore>,
    cached: Arc<Mutex<Option<Value>>>,
}

impl PluginSettingsHandle {
    fn new(guid: Uuid, store: Arc<dyn PluginSettingsStore>) -> Self {
        Self {
            guid,
            store,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub fn load(&self) -> Result<Value, PluginError> {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(value) = cached.as_ref() {
            return Ok(value.clone());
        }
        let value = self.store.load(self.guid)?.unwrap_or(Value::Null);
        *cached = Some(value.clone());
        Ok(value)
    }

    pub fn save(&self, value: Value) -> Result<(), PluginError> {
        self.store.save(self.guid, &value)?;
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = Some(value);
        Ok(())
    }
}

/// The four lifecycle hooks every third-party policy unit implements. The
/// host guarantees the calling order documented on `PluginInstance`.
pub trait StandbyPlugin: Send {
    fn initialize(&mut self, settings: PluginSettingsHandle) -> Result<(), PluginError>;
    fn prepare(&mut self) -> Result<(), PluginError>;
    fn check_policy(&mut self) -> Result<CheckSuspendResult, PluginError>;
    fn tear_down(&mut self) -> Result<(), PluginError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Initialized,
    Prepared,
    PolicyChecked,
    TornDown,
    Failed,
}

/// Lifecycle wrapper around one plugin:
/// `Unloaded -> Initialized -> {Prepared <-> PolicyChecked} -> TornDown`.
/// A failed `initialize` parks the plugin in `Failed` for the rest of the
/// process lifetime; failures in `prepare`/`check_policy` leave it eligible
/// for the next cycle.
pub struct PluginInstance {
    identity: PluginIdentity,
    plugin: Box<dyn StandbyPlugin>,
    state: LifecycleState,
    store: Arc<dyn PluginSettingsStore>,
}

impl PluginInstance {
    pub fn new(
        identity: PluginIdentity,
        plugin: Box<dyn StandbyPlugin>,
        store: Arc<dyn PluginSettingsStore>,
    ) -> Self {
        Self {
            identity,
            plugin,
            state: LifecycleState::Unloaded,
            store,
        }
    }

    pub fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// A plugin participates in monitoring cycles only between a successful
    /// `initialize` and its `tear_down`.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Initialized | LifecycleState::Prepared | LifecycleState::PolicyChecked
        )
    }

    pub fn initialize(&mut self) -> Result<(), PluginError> {
        if self.state != LifecycleState::Unloaded {
            return Err(PluginError::Lifecycle {
                state: self.state,
                event: "initialize",
            });
        }
        let handle = PluginSettingsHandle::new(self.identity.guid, self.store.clone());
        match self.plugin.initialize(handle) {
            Ok(()) => {
                self.state = LifecycleState::Initialized;
                Ok(())
            }
            Err(err) => {
                self.state = LifecycleState::Failed;
                Err(err)
            }
        }
    }

    pub fn prepare(&mut self) -> Result<(), PluginError> {
        if !matches!(
            self.state,
            LifecycleState::Initialized | LifecycleState::PolicyChecked
        ) {
            return Err(PluginError::Lifecycle {
                state: self.state,
                event: "prepare",
            });
        }
        self.plugin.prepare()?;
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    pub fn check_policy(&mut self) -> Result<CheckSuspendResult, PluginError> {
        if self.state != LifecycleState::Prepared {
            return Err(PluginError::Lifecycle {
                state: self.state,
                event: "check_policy",
            });
        }
        // The verdict may fail, but the prepare/check pair is complete either
        // way; the plugin stays eligible for the next cycle.
        self.state = LifecycleState::PolicyChecked;
        self.plugin.check_policy()
    }

    /// Terminal: a torn-down plugin cannot be reused without a fresh
    /// instance. Calling it on a never-activated plugin is a no-op.
    pub fn tear_down(&mut self) -> Result<(), PluginError> {
        match self.state {
            LifecycleState::TornDown => Ok(()),
            LifecycleState::Unloaded | LifecycleState::Failed => {
                self.state = LifecycleState::TornDown;
                Ok(())
            }
            _ => {
                self.state = LifecycleState::TornDown;
                self.plugin.tear_down()
            }
        }
    }
}

/// Collects registrations from the discovery collaborator into the ordered
/// plugin list the engine evaluates. One instance per distinct GUID: a
/// second registration under the same GUID is rejected.
pub struct PluginRegistry {
    store: Arc<dyn PluginSettingsStore>,
    instances: Vec<PluginInstance>,
}

impl PluginRegistry {
    pub fn new(store: Arc<dyn PluginSettingsStore>) -> Self {
        Self {
            store,
            instances: Vec::new(),
        }
    }

    pub fn register(&mut self, identity: PluginIdentity, plugin: Box<dyn StandbyPlugin>) {
        if self
            .instances
            .iter()
            .any(|instance| instance.identity().guid == identity.guid)
        {
            warn!(
                plugin = %identity.name,
                guid = %identity.guid,
                "plugin guid already registered, ignoring duplicate"
            );
            return;
        }
        debug!(plugin = %identity.name, version = %identity.version, guid = %identity.guid, "plugin registered");
        self.instances
            .push(PluginInstance::new(identity, plugin, self.store.clone()));
    }

    pub fn into_instances(self) -> Vec<PluginInstance> {
        self.instances
    }
}
