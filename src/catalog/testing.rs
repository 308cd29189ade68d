//! Fakes for the catalog's collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::column::Field;
use super::sync::{LiveSchemaProvider, ProbeError, ProbeRequest, ProbedColumn, SchemaProbe};

/// A probe answering every request with a fixed column list.
pub struct StaticProbe {
    columns: Mutex<Result<Vec<ProbedColumn>, ProbeError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ProbeRequest>>,
}

impl StaticProbe {
    pub fn new(columns: Vec<ProbedColumn>) -> Self {
        Self {
            columns: Mutex::new(Ok(columns)),
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing(error: ProbeError) -> Self {
        let probe = Self::new(Vec::new());
        *probe.columns.lock() = Err(error);
        probe
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change what later calls return.
    pub fn set_columns(&self, columns: Vec<ProbedColumn>) {
        *self.columns.lock() = Ok(columns);
    }

    pub fn set_error(&self, error: ProbeError) {
        *self.columns.lock() = Err(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProbeRequest> {
        self.last_request.lock().clone()
    }
}

impl SchemaProbe for StaticProbe {
    fn infer(&self, request: &ProbeRequest) -> Result<Vec<ProbedColumn>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.columns.lock().clone()
    }
}

/// A live schema holding a fixed set of tables.
#[derive(Default)]
pub struct StaticLiveSchema {
    tables: HashMap<String, Vec<Field>>,
}

impl StaticLiveSchema {
    pub fn with_table(mut self, name: &str, fields: Vec<Field>) -> Self {
        self.tables.insert(name.to_string(), fields);
        self
    }
}

impl LiveSchemaProvider for StaticLiveSchema {
    fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn get_fields(&self, name: &str) -> Vec<Field> {
        self.tables.get(name).cloned().unwrap_or_default()
    }
}
