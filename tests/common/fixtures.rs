//! Engine fixtures
//!
//! Builds engines over memory storage, a manual clock and the scripted
//! transport, and records every event they emit.

use super::mock_transport::MockTransport;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use watchsync::local_db::MemoryStorage;
use watchsync::shared::{EventType, ProgressRecord, SyncConfig, SyncEvent};
use watchsync::sync::{ManualClock, ResolutionPolicy, SyncEngine};

/// Initial value of the manual clock
pub const START_TIME: i64 = 10_000;

/// Device id used for records written by "another device"
pub const OTHER_DEVICE: &str = "device-other";

/// An engine with handles to everything it was built from
pub struct TestEngine {
    pub engine: SyncEngine,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MockTransport>,
    pub storage: Arc<MemoryStorage>,
    pub events: EventLog,
}

impl TestEngine {
    /// Engine with the default timing (30s timer, 5s/30s backoff, 3 retries)
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self::over_storage(config, storage)
    }

    /// Engine reusing an existing store, as after an app restart
    pub fn over_storage(config: SyncConfig, storage: Arc<MemoryStorage>) -> Self {
        let clock = Arc::new(ManualClock::new(START_TIME));
        let transport = MockTransport::new();
        let engine = SyncEngine::builder(config)
            .backend(storage.clone())
            .clock(clock.clone())
            .transport(transport.clone())
            .build()
            .expect("engine should build over memory storage");
        let events = EventLog::attach(&engine);

        Self {
            engine,
            clock,
            transport,
            storage,
            events,
        }
    }
}

/// Default configuration pointing at an unroutable server
pub fn test_config() -> SyncConfig {
    SyncConfig::builder()
        .api_base_url("http://127.0.0.1:9")
        .build()
        .expect("default test config is valid")
}

/// Configuration with a different default resolution policy
pub fn config_with_policy(policy: ResolutionPolicy) -> SyncConfig {
    SyncConfig::builder()
        .api_base_url("http://127.0.0.1:9")
        .default_policy(policy)
        .build()
        .expect("test config is valid")
}

/// Configuration with a different timer period
pub fn config_with_interval(interval: Duration) -> SyncConfig {
    SyncConfig::builder()
        .api_base_url("http://127.0.0.1:9")
        .sync_interval(interval)
        .build()
        .expect("test config is valid")
}

/// Record from another device
pub fn remote_record(item_id: &str, progress: f64, timestamp: i64, version: u64) -> ProgressRecord {
    ProgressRecord::new(item_id, progress, timestamp, OTHER_DEVICE)
        .with_version(version)
        .with_synced(true)
}

/// Every event emitted by an engine, in order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl EventLog {
    pub fn attach(engine: &SyncEngine) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        // Listener stays registered for the engine's lifetime
        let _ = engine.add_listener(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        log
    }

    pub fn all(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<EventType> {
        self.all().iter().map(SyncEvent::event_type).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.all()
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<SyncEvent> {
        self.all()
            .into_iter()
            .filter(|event| event.event_type() == event_type)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
