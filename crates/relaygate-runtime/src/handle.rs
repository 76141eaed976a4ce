//! Per-plugin control block and worker thread

use crate::context::PluginContext;
use crate::module::{ModuleCatalog, PluginModule};
use crate::services::Services;
use crate::stats::StatsSnapshot;
use parking_lot::Mutex;
use relaygate_config::{load_plugin_settings, LibrarySource, PluginSettings};
use relaygate_core::{Dequeued, Error, Result, WorkItem};
use relaygate_plugin_api::{panic_message, Host, MainAction, Plugin, PluginHost};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, info_span, warn};

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PluginState {
    /// No module loaded, or fully torn down
    Unloaded = 0,
    /// Module and settings loaded, no worker yet
    Loaded = 1,
    /// Worker thread running
    Running = 2,
    /// Teardown in progress
    Unloading = 3,
    /// A callback panicked; out of service until unloaded
    Failed = 4,
}

impl PluginState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PluginState::Loaded,
            2 => PluginState::Running,
            3 => PluginState::Unloading,
            4 => PluginState::Failed,
            _ => PluginState::Unloaded,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Unloaded => write!(f, "unloaded"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::Running => write!(f, "running"),
            PluginState::Unloading => write!(f, "unloading"),
            PluginState::Failed => write!(f, "failed"),
        }
    }
}

/// What to load for one plugin
#[derive(Debug, Clone)]
pub struct LoadSpec {
    /// Instance name
    pub name: String,
    /// Resolved module source
    pub source: LibrarySource,
    /// Resolved settings file
    pub config_path: Option<PathBuf>,
}

impl LoadSpec {
    /// Spec without a settings file
    pub fn new(name: impl Into<String>, source: LibrarySource) -> Self {
        Self {
            name: name.into(),
            source,
            config_path: None,
        }
    }

    /// Attach a settings file
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

struct Worker {
    thread: JoinHandle<Option<Box<dyn Plugin>>>,
}

/// Control block for one loaded plugin
pub struct PluginHandle {
    name: String,
    config_path: Option<PathBuf>,
    state: Arc<AtomicU8>,
    context: Arc<PluginContext>,
    module: PluginModule,
    worker: Mutex<Option<Worker>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("module", &self.module)
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl PluginHandle {
    /// Load the module and settings, register the queue and publications
    pub fn load(spec: LoadSpec, catalog: &ModuleCatalog, services: &Arc<Services>) -> Result<Self> {
        let LoadSpec {
            name,
            source,
            config_path,
        } = spec;

        let module = PluginModule::open(&name, &source, catalog)?;

        let settings = match &config_path {
            Some(path) => load_plugin_settings(path).map_err(|e| {
                Error::Config(format!("Plugin '{name}' settings {}: {e}", path.display()))
            })?,
            None => PluginSettings::default(),
        };

        let context = Arc::new(PluginContext::new(
            &name,
            module.name(),
            settings,
            Arc::clone(services),
        ));

        if !services
            .queues()
            .insert(&name, Arc::clone(context.queue()))
        {
            return Err(Error::PluginAlreadyExists(name));
        }

        for publication in &context.settings().publish {
            services
                .bus()
                .add_publication(&name, &publication.name, &publication.description);
        }

        info!(
            plugin = %name,
            module = %context.module(),
            outputs = ?context.outputs(),
            "Plugin loaded"
        );

        Ok(Self {
            name,
            config_path,
            state: Arc::new(AtomicU8::new(PluginState::Loaded as u8)),
            context,
            module,
            worker: Mutex::new(None),
            thread_id: Mutex::new(None),
        })
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module name
    pub fn module_name(&self) -> &str {
        self.context.module()
    }

    /// Settings file, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Lifecycle state
    pub fn state(&self) -> PluginState {
        PluginState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Runtime context
    pub fn context(&self) -> &Arc<PluginContext> {
        &self.context
    }

    /// Declared outputs
    pub fn outputs(&self) -> &[String] {
        self.context.outputs()
    }

    /// Counters
    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats().snapshot()
    }

    /// Current input queue depth
    pub fn queue_len(&self) -> usize {
        self.context.queue().len()
    }

    /// Worker thread, once running
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }

    /// Create the instance and spawn its worker thread
    pub fn start(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                PluginState::Loaded as u8,
                PluginState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(Error::InvalidState(format!(
                "Plugin {} is {}, expected loaded",
                self.name,
                self.state()
            )));
        }

        let host: Host = Arc::clone(&self.context) as Host;
        let Some(instance) = self.module.instantiate(host) else {
            self.state
                .store(PluginState::Loaded as u8, Ordering::SeqCst);
            return Err(Error::plugin(&self.name, "failed to create instance"));
        };

        let context = Arc::clone(&self.context);
        let state = Arc::clone(&self.state);
        let (id_tx, id_rx) = std::sync::mpsc::sync_channel(1);

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let id = context.services().threads().register_current(context.name());
                let _ = id_tx.send(id);
                run_worker(instance, &context, &state)
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.state
                    .store(PluginState::Loaded as u8, Ordering::SeqCst);
                return Err(Error::plugin(&self.name, format!("failed to spawn worker: {e}")));
            }
        };

        *self.thread_id.lock() = id_rx.recv().ok();
        *self.worker.lock() = Some(Worker { thread });

        info!(plugin = %self.name, "Plugin started");
        Ok(())
    }

    /// Stop the worker, release queued packets and destroy the instance
    ///
    /// Blocks until the worker thread has exited. Safe to call twice.
    pub fn unload(&self) {
        let previous = PluginState::from_u8(
            self.state
                .swap(PluginState::Unloading as u8, Ordering::SeqCst),
        );
        if matches!(previous, PluginState::Unloaded | PluginState::Unloading) {
            self.state.store(previous as u8, Ordering::SeqCst);
            warn!(plugin = %self.name, state = %previous, "Plugin already unloaded");
            return;
        }

        let services = self.context.services();

        self.context.request_exit();
        services.queues().remove(&self.name);
        self.context.queue().close();

        let instance = self.worker.lock().take().and_then(|worker| {
            match worker.thread.join() {
                Ok(instance) => instance,
                Err(_) => {
                    error!(plugin = %self.name, "Worker thread panicked");
                    None
                }
            }
        });

        if let Some(id) = self.thread_id.lock().take() {
            services.threads().remove(id);
        }

        let mut released = 0usize;
        for item in self.context.queue().drain() {
            if let WorkItem::Packet(packet) = item {
                services.packets().release(&packet);
                released += 1;
            }
        }

        let subscriptions = services.bus().unsubscribe_all(&self.name);
        services.bus().remove_publications(&self.name);

        if let Some(instance) = instance {
            self.module.destroy(instance);
        }

        self.state
            .store(PluginState::Unloaded as u8, Ordering::SeqCst);
        info!(
            plugin = %self.name,
            released_packets = released,
            subscriptions,
            "Plugin unloaded"
        );
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        if self.state() != PluginState::Unloaded {
            self.unload();
        }
    }
}

fn run_worker(
    mut instance: Box<dyn Plugin>,
    context: &PluginContext,
    state: &AtomicU8,
) -> Option<Box<dyn Plugin>> {
    let span = info_span!("plugin", plugin = %context.name());
    let _enter = span.enter();

    debug!("Worker started");
    let outcome = guarded(|| instance.main()).and_then(|action| match action {
        MainAction::MessageLoop => dispatch_loop(instance.as_mut(), context),
        MainAction::Finished => Ok(()),
    });

    if let Err(reason) = outcome {
        error!(reason = %reason, "Plugin panicked, taking it out of service");
        take_out_of_service(context, state);
    }
    debug!("Worker exiting");

    Some(instance)
}

fn guarded<R>(f: impl FnOnce() -> R) -> std::result::Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| panic_message(payload.as_ref()).to_string())
}

/// Packets are always released, even when `process_packet` panics
fn dispatch_loop(plugin: &mut dyn Plugin, context: &PluginContext) -> std::result::Result<(), String> {
    let queue = context.queue();
    let packets = context.services().packets();

    while !context.exit_requested() {
        match queue.dequeue(context.timeout()) {
            Dequeued::TimedOut => {
                guarded(|| plugin.message_timeout())?;
            }
            Dequeued::Item(WorkItem::Packet(packet)) => {
                context.stats().record_in(packet.len());
                let outcome = guarded(|| plugin.process_packet(&packet));
                packets.release(&packet);
                outcome?;
            }
            Dequeued::Item(WorkItem::Message(message)) => {
                guarded(|| plugin.process_message(&message))?;
            }
            Dequeued::Closed => break,
        }
    }
    Ok(())
}

/// Detach a faulted plugin so nothing else is routed to it
fn take_out_of_service(context: &PluginContext, state: &AtomicU8) {
    let services = context.services();
    services.queues().remove(context.name());
    context.queue().close();

    let mut released = 0usize;
    for item in context.queue().drain() {
        if let WorkItem::Packet(packet) = item {
            services.packets().release(&packet);
            released += 1;
        }
    }
    let subscriptions = services.bus().unsubscribe_all(context.name());

    let _ = state.compare_exchange(
        PluginState::Running as u8,
        PluginState::Failed as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    warn!(released_packets = released, subscriptions, "Plugin out of service");
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::{Packet, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    static TIMEOUTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Ticker {
        host: Host,
    }

    impl Plugin for Ticker {
        fn init(&mut self) -> relaygate_plugin_api::error::Result<()> {
            self.host.set_timeout(Some(Duration::from_millis(5)));
            Ok(())
        }

        fn process_packet(&mut self, _packet: &Packet) -> bool {
            true
        }

        fn message_timeout(&mut self) -> bool {
            TIMEOUTS.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn ticker(host: Host) -> Box<dyn Plugin> {
        Box::new(Ticker { host })
    }

    #[derive(Debug)]
    struct Crasher;

    impl Plugin for Crasher {
        fn main(&mut self) -> MainAction {
            panic!("main exploded");
        }

        fn process_packet(&mut self, _packet: &Packet) -> bool {
            true
        }
    }

    fn crasher(_host: Host) -> Box<dyn Plugin> {
        Box::new(Crasher)
    }

    static INIT_THREAD: std::sync::OnceLock<ThreadId> = std::sync::OnceLock::new();
    static EXIT_THREAD: std::sync::OnceLock<ThreadId> = std::sync::OnceLock::new();

    #[derive(Debug)]
    struct Recorder;

    impl Plugin for Recorder {
        fn init(&mut self) -> relaygate_plugin_api::error::Result<()> {
            let _ = INIT_THREAD.set(thread::current().id());
            Ok(())
        }

        fn process_packet(&mut self, _packet: &Packet) -> bool {
            true
        }

        fn exit_handler(&mut self) {
            let _ = EXIT_THREAD.set(thread::current().id());
        }
    }

    fn recorder(_host: Host) -> Box<dyn Plugin> {
        Box::new(Recorder)
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .with("ticker", ticker)
            .with("crasher", crasher)
            .with("recorder", recorder)
    }

    fn load(name: &str, services: &Arc<Services>) -> PluginHandle {
        PluginHandle::load(
            LoadSpec::new(name, LibrarySource::Builtin("ticker".to_string())),
            &catalog(),
            services,
        )
        .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let services = Arc::new(Services::default());
        let handle = load("Ticker", &services);
        assert_eq!(handle.state(), PluginState::Loaded);
        assert!(services.queues().contains("Ticker"));

        handle.start().unwrap();
        assert_eq!(handle.state(), PluginState::Running);
        assert!(handle.start().is_err());

        let id = handle.thread_id().expect("thread id");
        assert_eq!(services.threads().plugin_of(id).as_deref(), Some("Ticker"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(TIMEOUTS.load(Ordering::SeqCst) > 0);

        handle.unload();
        assert_eq!(handle.state(), PluginState::Unloaded);
        assert!(!services.queues().contains("Ticker"));
        assert!(services.threads().plugin_of(id).is_none());

        handle.unload();
        assert_eq!(handle.state(), PluginState::Unloaded);
    }

    #[test]
    fn test_unload_releases_queued_packets() {
        let services = Arc::new(Services::default());
        let handle = load("Idle", &services);

        let p = Packet::new(vec![0u8; 16]);
        services.packets().acquire(&p);
        handle
            .context()
            .queue()
            .enqueue(WorkItem::Packet(p.clone()))
            .unwrap();

        handle.unload();
        assert!(!services.packets().is_tracked(&p));
    }

    #[test]
    fn test_unload_drops_subscriptions() {
        let services = Arc::new(Services::default());
        let handle = load("Listener", &services);
        handle.context().subscribe("topic");
        assert_eq!(services.bus().subscribers("topic"), vec!["Listener"]);

        handle.start().unwrap();
        handle.unload();
        assert!(services.bus().subscribers("topic").is_empty());

        let v = Value::new(1u8);
        services
            .bus()
            .publish(&relaygate_core::Origin::new("X", "x"), "topic", &v);
        assert_eq!(v.ref_count(), 1);
    }

    #[test]
    fn test_duplicate_queue_name_rejected() {
        let services = Arc::new(Services::default());
        let _first = load("Twin", &services);
        let second = PluginHandle::load(
            LoadSpec::new("Twin", LibrarySource::Builtin("ticker".to_string())),
            &catalog(),
            &services,
        );
        assert!(matches!(second, Err(Error::PluginAlreadyExists(_))));
    }

    #[test]
    fn test_panicking_main_takes_plugin_out_of_service() {
        let services = Arc::new(Services::default());
        let handle = PluginHandle::load(
            LoadSpec::new("Crasher", LibrarySource::Builtin("crasher".to_string())),
            &catalog(),
            &services,
        )
        .unwrap();
        handle.context().subscribe("crash.topic");
        handle.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.state() != PluginState::Failed && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(handle.state(), PluginState::Failed);
        assert!(!services.queues().contains("Crasher"));
        assert!(handle.context().queue().is_closed());
        assert!(services.bus().subscribers("crash.topic").is_empty());

        handle.unload();
        assert_eq!(handle.state(), PluginState::Unloaded);
    }

    #[test]
    fn test_init_and_exit_run_on_the_controlling_thread() {
        let services = Arc::new(Services::default());
        let handle = PluginHandle::load(
            LoadSpec::new("Recorder", LibrarySource::Builtin("recorder".to_string())),
            &catalog(),
            &services,
        )
        .unwrap();

        handle.start().unwrap();
        let worker = handle.thread_id().expect("thread id");
        handle.unload();

        let here = thread::current().id();
        assert_eq!(INIT_THREAD.get(), Some(&here));
        assert_eq!(EXIT_THREAD.get(), Some(&here));
        assert_ne!(worker, here);
    }
}
