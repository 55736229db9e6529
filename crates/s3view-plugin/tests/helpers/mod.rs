//! Shared test helpers for plugin runtime integration tests.
//!
//! "Module" files are JSON [`PluginSpec`] documents. [`FakeModuleLoader`]
//! stands in for the OS loader: it parses the file, checks the exported
//! symbol list, and hands out [`TestPlugin`] instances built from the spec.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use s3view_core::config::PluginConfig;
use s3view_core::config::plugin::{FACTORY_SYMBOL, METADATA_SYMBOL};
use s3view_plugin::ffi::abi::PluginBox;
use s3view_plugin::prelude::*;
use s3view_plugin::{ModuleLoader, PluginLoader, PluginModule, PluginRegistry, SecurityGate};

/// Shared, ordered record of plugin calls, e.g. `"gzip:pre_process"`.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Behaviour of a test plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSpec {
    pub name: String,
    pub version: String,
    pub operations: Vec<S3Operation>,
    pub priority: Option<u8>,
    pub pre_process: bool,
    pub fail_pre_process: bool,
    pub post_process: bool,
    pub stream: bool,
    pub batch: bool,
    pub select: bool,
    pub min_batch_items: Option<usize>,
    pub fail_init: bool,
    pub init_delay_ms: u64,
    pub execute_delay_ms: u64,
    pub panic_on_execute: bool,
    pub panic_on_should_execute: bool,
    /// Symbols the module exports; both entry points when `None`.
    pub symbols: Option<Vec<String>>,
}

/// A spec for `name` at version 1.0.0 supporting uploads.
pub fn spec(name: &str) -> PluginSpec {
    PluginSpec {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        operations: vec![S3Operation::Upload],
        ..PluginSpec::default()
    }
}

/// Plugin whose behaviour is driven by a [`PluginSpec`].
#[derive(Debug)]
pub struct TestPlugin {
    spec: PluginSpec,
    events: EventLog,
}

impl TestPlugin {
    pub fn new(spec: PluginSpec, events: EventLog) -> Self {
        Self { spec, events }
    }

    pub fn boxed(spec: PluginSpec, events: &EventLog) -> PluginBox {
        Box::new(Self::new(spec, events.clone()))
    }

    fn record(&self, what: impl AsRef<str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.spec.name, what.as_ref()));
    }
}

#[async_trait]
impl S3Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(&self.spec.name, &self.spec.version)
    }

    fn supported_operations(&self) -> Vec<S3Operation> {
        self.spec.operations.clone()
    }

    async fn initialize(&self, config: Option<&serde_json::Value>) -> PluginResult<()> {
        if self.spec.init_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.init_delay_ms)).await;
        }
        if self.spec.fail_init {
            return Err(PluginError::execution("missing credentials"));
        }
        match config {
            Some(config) => self.record(format!("initialize:{config}")),
            None => self.record("initialize"),
        }
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &OperationContext,
        args: &OperationArgs,
    ) -> PluginResult<OperationResult> {
        if self.spec.execute_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.execute_delay_ms)).await;
        }
        if self.spec.panic_on_execute {
            panic!("{} blew up", self.spec.name);
        }
        self.record("execute");
        Ok(OperationResult::success(self.spec.name.clone())
            .with_data(json!({ "trace": args.get("trace").cloned().unwrap_or(json!([])) })))
    }

    async fn cleanup(&self) -> PluginResult<()> {
        self.record("cleanup");
        Ok(())
    }

    fn as_pre_processor(&self) -> Option<&dyn PreProcessor> {
        (self.spec.pre_process || self.spec.fail_pre_process).then_some(self as &dyn PreProcessor)
    }

    fn as_post_processor(&self) -> Option<&dyn PostProcessor> {
        self.spec.post_process.then_some(self as &dyn PostProcessor)
    }

    fn as_stream_processor(&self) -> Option<&dyn StreamProcessor> {
        self.spec.stream.then_some(self as &dyn StreamProcessor)
    }

    fn as_batch_processor(&self) -> Option<&dyn BatchProcessor> {
        self.spec.batch.then_some(self as &dyn BatchProcessor)
    }

    fn as_select_processor(&self) -> Option<&dyn SelectProcessor> {
        self.spec.select.then_some(self as &dyn SelectProcessor)
    }

    fn as_prioritized(&self) -> Option<&dyn PrioritizedPlugin> {
        self.spec.priority.map(|_| self as &dyn PrioritizedPlugin)
    }

    fn as_conditional(&self) -> Option<&dyn ConditionalPlugin> {
        (self.spec.min_batch_items.is_some() || self.spec.panic_on_should_execute)
            .then_some(self as &dyn ConditionalPlugin)
    }
}

#[async_trait]
impl PreProcessor for TestPlugin {
    async fn pre_process(
        &self,
        _ctx: &OperationContext,
        mut args: OperationArgs,
    ) -> PluginResult<OperationArgs> {
        self.record("pre_process");
        if self.spec.fail_pre_process {
            return Err(PluginError::execution("quota exceeded"));
        }
        let trace = args.entry("trace".to_string()).or_insert_with(|| json!([]));
        if let Some(trace) = trace.as_array_mut() {
            trace.push(json!(self.spec.name));
        }
        Ok(args)
    }
}

#[async_trait]
impl PostProcessor for TestPlugin {
    async fn post_process(
        &self,
        _ctx: &OperationContext,
        result: OperationResult,
    ) -> PluginResult<OperationResult> {
        self.record("post_process");
        Ok(result.with_metadata(&format!("post.{}", self.spec.name), json!(true)))
    }
}

#[async_trait]
impl StreamProcessor for TestPlugin {
    async fn process_stream(
        &self,
        _ctx: &OperationContext,
        stream: BoxByteStream,
    ) -> PluginResult<BoxByteStream> {
        self.record("process_stream");
        Ok(stream)
    }
}

#[async_trait]
impl BatchProcessor for TestPlugin {
    async fn process_batch(
        &self,
        _ctx: &OperationContext,
        items: Vec<serde_json::Value>,
    ) -> PluginResult<OperationResult> {
        self.record("process_batch");
        Ok(OperationResult::success(format!("batch of {}", items.len())))
    }
}

#[async_trait]
impl SelectProcessor for TestPlugin {
    async fn process_select(
        &self,
        _ctx: &OperationContext,
        query: &str,
        format: &str,
    ) -> PluginResult<OperationResult> {
        self.record("process_select");
        Ok(OperationResult::success(format!("{query} as {format}")))
    }
}

impl PrioritizedPlugin for TestPlugin {
    fn priority(&self) -> Priority {
        Priority(self.spec.priority.unwrap_or(Priority::MEDIUM.0))
    }
}

impl ConditionalPlugin for TestPlugin {
    fn should_execute(&self, _ctx: &OperationContext, args: &OperationArgs) -> bool {
        if self.spec.panic_on_should_execute {
            panic!("{} predicate blew up", self.spec.name);
        }
        let items = args
            .get("items")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        items >= self.spec.min_batch_items.unwrap_or(0)
    }
}

/// In-process stand-in for the shared-library loader.
#[derive(Debug, Default)]
pub struct FakeModuleLoader {
    pub events: EventLog,
    /// Successful and failed `open` calls.
    pub opens: AtomicUsize,
    /// Modules dropped (i.e. "unmapped").
    pub unmapped: Arc<AtomicUsize>,
}

impl FakeModuleLoader {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn unmapped(&self) -> usize {
        self.unmapped.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for FakeModuleLoader {
    fn open(&self, path: &Path, required_symbols: &[String]) -> PluginResult<Arc<dyn PluginModule>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let bytes = std::fs::read(path)?;
        let spec: PluginSpec = serde_json::from_slice(&bytes)
            .map_err(|e| PluginError::load_failed(path, format!("failed to load library: {e}")))?;

        let exported = spec
            .symbols
            .clone()
            .unwrap_or_else(|| vec![METADATA_SYMBOL.to_string(), FACTORY_SYMBOL.to_string()]);
        for symbol in required_symbols {
            if !exported.contains(symbol) {
                return Err(PluginError::load_failed(
                    path,
                    format!("missing symbol '{symbol}'"),
                ));
            }
        }

        Ok(Arc::new(FakeModule {
            spec,
            events: self.events.clone(),
            unmapped: self.unmapped.clone(),
        }))
    }
}

#[derive(Debug)]
struct FakeModule {
    spec: PluginSpec,
    events: EventLog,
    unmapped: Arc<AtomicUsize>,
}

impl PluginModule for FakeModule {
    fn metadata(&self) -> PluginResult<PluginMetadata> {
        Ok(PluginMetadata::new(&self.spec.name, &self.spec.version))
    }

    fn create(&self) -> PluginResult<PluginBox> {
        Ok(TestPlugin::boxed(self.spec.clone(), &self.events))
    }
}

impl Drop for FakeModule {
    fn drop(&mut self) {
        self.unmapped.fetch_add(1, Ordering::SeqCst);
    }
}

/// A loader wired to a temporary plugin directory and a fake module loader.
pub struct TestHost {
    pub dir: TempDir,
    pub registry: Arc<PluginRegistry>,
    pub modules: Arc<FakeModuleLoader>,
    pub loader: PluginLoader,
    pub scope: CancellationToken,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Builds a host; `tweak` adjusts the defaults (watcher off, 50 ms
    /// interval, `.so` only) before the loader is created.
    pub fn with_config(tweak: impl FnOnce(&mut PluginConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PluginConfig {
            directories: vec![dir.path().to_string_lossy().into_owned()],
            auto_reload: false,
            reload_interval_ms: 50,
            allowed_extensions: vec!["so".to_string()],
            load_timeout_seconds: 5,
            ..PluginConfig::default()
        };
        tweak(&mut config);

        let registry = Arc::new(PluginRegistry::new());
        let modules = Arc::new(FakeModuleLoader::default());
        let gate = SecurityGate::from_config(&config);
        let loader = PluginLoader::with_parts(config, registry.clone(), modules.clone(), gate);

        Self {
            dir,
            registry,
            modules,
            loader,
            scope: CancellationToken::new(),
        }
    }

    /// Writes `spec` to `file` (relative to the plugin directory) with
    /// mode 0644.
    pub fn write_plugin(&self, file: &str, spec: &PluginSpec) -> PathBuf {
        let path = self.dir.path().join(file);
        write_spec(&path, spec);
        path
    }

    /// Replaces an existing module in one rename, with an mtime strictly
    /// later than the old one.
    pub fn rewrite_plugin(&self, path: &Path, spec: &PluginSpec) {
        self.rewrite_bytes(path, &serde_json::to_vec(spec).unwrap());
    }

    /// [`TestHost::rewrite_plugin`] with arbitrary contents.
    pub fn rewrite_bytes(&self, path: &Path, contents: &[u8]) {
        let before = std::fs::metadata(path).unwrap().modified().unwrap();
        let staged = path.with_extension("staged");
        std::fs::write(&staged, contents).unwrap();
        set_mode(&staged, 0o644);
        set_mtime(&staged, before + Duration::from_secs(2));
        std::fs::rename(&staged, path).unwrap();
    }

    pub fn events(&self) -> Vec<String> {
        self.modules.events.lock().unwrap().clone()
    }

    pub async fn version_of(&self, name: &str) -> Option<String> {
        self.registry.get(name).await.map(|p| p.metadata().version)
    }
}

pub fn write_spec(path: &Path, spec: &PluginSpec) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec(spec).unwrap()).unwrap();
    set_mode(path, 0o644);
}

pub fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
}

pub fn set_mtime(path: &Path, when: SystemTime) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

/// Polls `check` every 10 ms until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
