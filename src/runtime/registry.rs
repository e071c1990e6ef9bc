//! Registries of activity proxies and workflow definitions.
//!
//! Both are built once by the hosting process and shared immutably. A
//! `Registry<H>` maps a name to its versions; activities are looked up by name
//! (their version travels with the proxy), workflows by exact name and version
//! as named on the decision task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::{FnWorkflow, WorkflowHandler};
use crate::_typed_codec::{Codec, Json};
use crate::WorkflowContext;
use crate::options::ActivityOptions;

/// Invocation site for one remote unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityProxy {
    name: String,
    version: String,
    defaults: ActivityOptions,
    manual_errors: bool,
}

impl ActivityProxy {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ActivityProxyBuilder {
        ActivityProxyBuilder {
            proxy: ActivityProxy {
                name: name.into(),
                version: version.into(),
                defaults: ActivityOptions::default(),
                manual_errors: false,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Static defaults declared for this site.
    pub fn defaults(&self) -> &ActivityOptions {
        &self.defaults
    }

    /// Failures are handed to coordination code instead of failing the workflow.
    pub fn manual_errors(&self) -> bool {
        self.manual_errors
    }
}

pub struct ActivityProxyBuilder {
    proxy: ActivityProxy,
}

impl ActivityProxyBuilder {
    pub fn heartbeat(mut self, timeout: Duration) -> Self {
        self.proxy.defaults.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn schedule_to_close(mut self, timeout: Duration) -> Self {
        self.proxy.defaults.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn schedule_to_start(mut self, timeout: Duration) -> Self {
        self.proxy.defaults.schedule_to_start_timeout = Some(timeout);
        self
    }

    pub fn start_to_close(mut self, timeout: Duration) -> Self {
        self.proxy.defaults.start_to_close_timeout = Some(timeout);
        self
    }

    pub fn task_list(mut self, task_list: impl Into<String>) -> Self {
        self.proxy.defaults.task_list = Some(task_list.into());
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.proxy.defaults.retry = Some(retry);
        self
    }

    pub fn options(mut self, options: ActivityOptions) -> Self {
        self.proxy.defaults = options;
        self
    }

    pub fn manual_errors(mut self, enabled: bool) -> Self {
        self.proxy.manual_errors = enabled;
        self
    }

    pub fn build(self) -> ActivityProxy {
        self.proxy
    }
}

/// A registered workflow: the coordination function and the proxies it may call.
pub struct WorkflowDefinition {
    pub handler: Arc<dyn WorkflowHandler>,
    pub activities: ActivityRegistry,
}

/// Generic name -> version -> handler registry.
pub struct Registry<H: ?Sized> {
    pub(crate) inner: Arc<HashMap<String, BTreeMap<String, Arc<H>>>>,
}

// Derive would demand H: Clone.
impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }
}

pub struct RegistryBuilder<H: ?Sized> {
    map: HashMap<String, BTreeMap<String, Arc<H>>>,
    errors: Vec<String>,
}

pub type ActivityRegistry = Registry<ActivityProxy>;
pub type WorkflowRegistry = Registry<WorkflowDefinition>;
pub type ActivityRegistryBuilder = RegistryBuilder<ActivityProxy>;
pub type WorkflowRegistryBuilder = RegistryBuilder<WorkflowDefinition>;

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn resolve_exact(&self, name: &str, version: &str) -> Option<Arc<H>> {
        let result = self.inner.get(name).and_then(|versions| versions.get(version)).cloned();
        if result.is_none() {
            self.log_registry_miss(name, Some(version));
        }
        result
    }

    /// Highest registered version, in string order.
    pub fn resolve_latest(&self, name: &str) -> Option<Arc<H>> {
        let result = self
            .inner
            .get(name)
            .and_then(|versions| versions.values().next_back())
            .cloned();
        if result.is_none() {
            self.log_registry_miss(name, None);
        }
        result
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_versions(&self, name: &str) -> Vec<String> {
        self.inner
            .get(name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    fn log_registry_miss(&self, name: &str, requested_version: Option<&str>) {
        tracing::debug!(
            target: "replayflow::runtime::registry",
            requested_name = %name,
            requested_version = ?requested_version,
            available_versions_for_name = ?self.list_versions(name),
            registered_names = ?self.list_names(),
            "registry lookup miss"
        );
    }
}

impl<H: ?Sized> RegistryBuilder<H> {
    pub fn build(self) -> Registry<H> {
        Registry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns an error string containing all registration errors if any handlers failed to register.
    pub fn build_result(self) -> Result<Registry<H>, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }

    fn insert(&mut self, name: String, version: String, handler: Arc<H>, error_prefix: &str) {
        let entry = self.map.entry(name.clone()).or_default();
        if entry.contains_key(&version) {
            self.errors
                .push(format!("duplicate {error_prefix} registration: {name}@{version}"));
        } else {
            entry.insert(version, handler);
        }
    }
}

impl Registry<ActivityProxy> {
    /// Proxy registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<ActivityProxy>> {
        self.resolve_latest(name)
    }
}

impl ActivityRegistryBuilder {
    /// Register a proxy. Only one version per activity name is allowed in a
    /// registry; a second registration under the same name is an error.
    pub fn register(mut self, proxy: ActivityProxy) -> Self {
        let name = proxy.name.clone();
        if let Some(existing) = self.map.get(&name).and_then(|v| v.keys().next()) {
            self.errors.push(format!(
                "duplicate activity registration: {name}@{} (already {name}@{existing})",
                proxy.version
            ));
            return self;
        }
        let version = proxy.version.clone();
        self.insert(name, version, Arc::new(proxy), "activity");
        self
    }
}

impl WorkflowRegistryBuilder {
    pub fn register<F, Fut>(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        activities: ActivityRegistry,
        f: F,
    ) -> Self
    where
        F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        let definition = WorkflowDefinition {
            handler: Arc::new(FnWorkflow(f)),
            activities,
        };
        self.insert(name.into(), version.into(), Arc::new(definition), "workflow");
        self
    }

    pub fn register_typed<In, Out, F, Fut>(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        activities: ActivityRegistry,
        f: F,
    ) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(WorkflowContext, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper = move |ctx: WorkflowContext, input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = Json::decode(&input_s)?;
                let out: Out = (f_inner)(ctx, input).await?;
                Json::encode(&out)
            }
        };
        let definition = WorkflowDefinition {
            handler: Arc::new(FnWorkflow(wrapper)),
            activities,
        };
        self.insert(name.into(), version.into(), Arc::new(definition), "workflow");
        self
    }
}
