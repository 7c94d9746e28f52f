//! Shared test doubles for the orchestrator and its tasks.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::store::ArtifactStore;
use crate::types::FetchOutcome;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Config with short delays and an in-memory output dir
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.api.base_url = "http://dex.test/api/v2/pokemon".to_string();
    config.retry.base_delay = Duration::from_millis(10);
    config.output.output_dir = PathBuf::from("mem");
    config.progress_interval = Duration::from_millis(50);
    config
}

/// JSON body that passes the default validation rules for `name`
pub(crate) fn record_body(name: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "id": 1, "name": name })).unwrap()
}

/// Fetcher that replays scripted outcomes per item id.
///
/// The last scripted outcome repeats once the script runs out; unscripted
/// items get a 404.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
    delay: Option<Duration>,
    in_flight: Mutex<(usize, usize)>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Each fetch takes `delay` before answering
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub(crate) fn script(&self, item_id: &str, outcomes: Vec<FetchOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), outcomes.into());
    }

    pub(crate) fn calls(&self, item_id: &str) -> usize {
        self.calls.lock().unwrap().get(item_id).map_or(0, Vec::len)
    }

    pub(crate) fn call_times(&self, item_id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Highest number of fetches observed in flight at once
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    fn next_outcome(&self, item_id: &str) -> FetchOutcome {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(item_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or(FetchOutcome::HttpError { code: 404 }),
            None => FetchOutcome::HttpError { code: 404 },
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let item_id = url.rsplit('/').next().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap()
            .entry(item_id.clone())
            .or_default()
            .push(Instant::now());

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.0 += 1;
            in_flight.1 = in_flight.1.max(in_flight.0);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.lock().unwrap().0 -= 1;

        self.next_outcome(&item_id)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// In-memory artifact store, optionally failing every write
#[derive(Default)]
pub(crate) struct MemoryStore {
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<usize>,
    failing: bool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub(crate) fn insert(&self, item_id: &str, body: Vec<u8>) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), body);
    }

    pub(crate) fn get(&self, item_id: &str) -> Option<Vec<u8>> {
        self.artifacts.lock().unwrap().get(item_id).cloned()
    }

    pub(crate) fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn write(&self, item_id: &str, body: &[u8]) -> Result<PathBuf> {
        *self.writes.lock().unwrap() += 1;
        if self.failing {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.insert(item_id, body.to_vec());
        Ok(self.artifact_path(item_id))
    }

    async fn exists(&self, item_id: &str) -> bool {
        self.artifacts.lock().unwrap().contains_key(item_id)
    }

    fn artifact_path(&self, item_id: &str) -> PathBuf {
        PathBuf::from(format!("mem/{item_id}.json"))
    }

    async fn cleanup_partials(&self) -> Result<usize> {
        Ok(0)
    }
}
