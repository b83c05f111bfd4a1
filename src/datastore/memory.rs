//! In-memory keyspace and indexes
//!
//! Backs tests and embedded use. Each index computes its entries from the
//! keyspace at scan time, so mutations are visible to the next scan call.
//! Fault injection hooks let callers simulate scan timeouts and failures.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use serde_json::{json, Value};

use super::connection::IndexConnection;
use super::errors::DatastoreError;
use super::scan::{IndexEntry, ScanRequest, SearchRequest};
use super::{FetchOutcome, Index, Keyspace, MutationOutcome, MutationPair, SearchIndex};
use crate::value::{AnnotatedValue, DocumentMeta};

/// Documents held in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    name: String,
    docs: RwLock<BTreeMap<String, Value>>,
    failing: RwLock<FxHashSet<String>>,
    fetch_calls: AtomicUsize,
    mutation_batches: Mutex<Vec<usize>>,
}

impl MemoryKeyspace {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ..Self::default()
        })
    }

    /// A keyspace preloaded with `docs`.
    pub fn with_docs<K, I>(name: impl Into<String>, docs: I) -> Arc<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let keyspace = Self::new(name);
        {
            let mut map = keyspace.docs.write();
            for (key, value) in docs {
                map.insert(key.into(), value);
            }
        }
        keyspace
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.docs.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.docs.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.docs.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.docs.read().keys().cloned().collect()
    }

    /// Makes every fetch or mutation touching `key` fail.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.failing.write().insert(key.into());
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    /// Sizes of the mutation batches received so far, in call order.
    pub fn mutation_batches(&self) -> Vec<usize> {
        self.mutation_batches.lock().clone()
    }

    fn snapshot(&self) -> Vec<(String, Value)> {
        self.docs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn is_failing(&self, key: &str) -> bool {
        self.failing.read().contains(key)
    }

    fn mutate<F>(&self, pairs: Vec<MutationPair>, mut apply: F) -> MutationOutcome
    where
        F: FnMut(&mut BTreeMap<String, Value>, &MutationPair) -> Result<bool, DatastoreError>,
    {
        self.mutation_batches.lock().push(pairs.len());
        let mut outcome = MutationOutcome::default();
        let mut docs = self.docs.write();
        for pair in pairs {
            if self.is_failing(&pair.key) {
                outcome.errors.push(DatastoreError::failure(
                    Some(pair.key.clone()),
                    "injected mutation failure",
                ));
                continue;
            }
            match apply(&mut *docs, &pair) {
                Ok(true) => {
                    outcome.count += 1;
                    outcome.pairs.push(pair);
                }
                Ok(false) => {}
                Err(err) => outcome.errors.push(err),
            }
        }
        outcome
    }
}

impl Keyspace for MemoryKeyspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, keys: &[String]) -> FetchOutcome {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        let docs = self.docs.read();
        let mut outcome = FetchOutcome::default();
        for key in keys {
            if self.is_failing(key) {
                outcome
                    .errors
                    .push(DatastoreError::failure(Some(key.clone()), "injected fetch failure"));
                continue;
            }
            if let Some(value) = docs.get(key) {
                outcome
                    .docs
                    .push(AnnotatedValue::with_meta(value.clone(), DocumentMeta::with_id(key)));
            }
        }
        outcome
    }

    fn insert(&self, pairs: Vec<MutationPair>) -> MutationOutcome {
        self.mutate(pairs, |docs, pair| {
            if docs.contains_key(&pair.key) {
                return Err(DatastoreError::key_exists(&pair.key));
            }
            docs.insert(pair.key.clone(), pair.value.clone());
            Ok(true)
        })
    }

    fn upsert(&self, pairs: Vec<MutationPair>) -> MutationOutcome {
        self.mutate(pairs, |docs, pair| {
            docs.insert(pair.key.clone(), pair.value.clone());
            Ok(true)
        })
    }

    fn update(&self, pairs: Vec<MutationPair>) -> MutationOutcome {
        self.mutate(pairs, |docs, pair| match docs.get_mut(&pair.key) {
            Some(slot) => {
                *slot = pair.value.clone();
                Ok(true)
            }
            None => Err(DatastoreError::key_not_found(&pair.key)),
        })
    }

    fn delete(&self, pairs: Vec<MutationPair>) -> MutationOutcome {
        // deleting an absent key is not an error, it just does not count
        self.mutate(pairs, |docs, pair| Ok(docs.remove(&pair.key).is_some()))
    }
}

type KeyFn = Arc<dyn Fn(&str, &Value) -> Vec<Vec<Value>> + Send + Sync>;
type TimeoutHook = Box<dyn FnOnce() + Send>;

/// Ordered index computed from a [`MemoryKeyspace`].
pub struct MemoryIndex {
    name: String,
    primary: bool,
    keyspace: Arc<MemoryKeyspace>,
    key_fn: KeyFn,
    timeout_every: AtomicUsize,
    on_timeout: Mutex<Option<TimeoutHook>>,
    fail_with: Mutex<Option<DatastoreError>>,
    ignore_limit: AtomicBool,
    delivered: AtomicUsize,
    scans: AtomicUsize,
}

impl fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("name", &self.name)
            .field("primary", &self.primary)
            .field("keyspace", &self.keyspace.name)
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl MemoryIndex {
    fn build(name: String, primary: bool, keyspace: Arc<MemoryKeyspace>, key_fn: KeyFn) -> Arc<Self> {
        Arc::new(Self {
            name,
            primary,
            keyspace,
            key_fn,
            timeout_every: AtomicUsize::new(0),
            on_timeout: Mutex::new(None),
            fail_with: Mutex::new(None),
            ignore_limit: AtomicBool::new(false),
            delivered: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
        })
    }

    /// Primary index: one entry per document, keyed by the document key.
    pub fn primary(keyspace: Arc<MemoryKeyspace>) -> Arc<Self> {
        let name = format!("#primary:{}", keyspace.name);
        Self::build(
            name,
            true,
            keyspace,
            Arc::new(|key: &str, _: &Value| vec![vec![Value::String(key.to_string())]]),
        )
    }

    /// Secondary index on dotted field paths. Documents missing the leading
    /// field are not indexed.
    pub fn on_fields(name: impl Into<String>, keyspace: Arc<MemoryKeyspace>, fields: &[&str]) -> Arc<Self> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        Self::build(
            name.into(),
            false,
            keyspace,
            Arc::new(move |_: &str, doc: &Value| {
                let key: Vec<Value> = fields
                    .iter()
                    .map(|path| lookup(doc, path).cloned().unwrap_or(Value::Null))
                    .collect();
                match key.first() {
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => vec![key],
                }
            }),
        )
    }

    /// Index with caller-computed entry keys; a document may produce several.
    pub fn with_key_fn<F>(name: impl Into<String>, keyspace: Arc<MemoryKeyspace>, key_fn: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> Vec<Vec<Value>> + Send + Sync + 'static,
    {
        Self::build(name.into(), false, keyspace, Arc::new(key_fn))
    }

    /// Every scan call times out after delivering `n` entries, if more remain.
    /// Zero disables the injection.
    pub fn time_out_every(&self, n: usize) {
        self.timeout_every.store(n, Ordering::Relaxed);
    }

    /// Runs `hook` once, right before the next injected timeout is signaled.
    pub fn on_next_timeout<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_timeout.lock() = Some(Box::new(hook));
    }

    /// Makes every scan fail with `err`.
    pub fn fail_with(&self, err: DatastoreError) {
        *self.fail_with.lock() = Some(err);
    }

    /// Makes scans disregard the pushed-down limit, leaving the scan operator
    /// to stop the stream itself.
    pub fn ignore_limit(&self) {
        self.ignore_limit.store(true, Ordering::Relaxed);
    }

    /// Entries handed to a connection across all scans.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of scan calls made.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn keyspace(&self) -> &Arc<MemoryKeyspace> {
        &self.keyspace
    }

    fn entries(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self
            .keyspace
            .snapshot()
            .into_iter()
            .flat_map(|(key, doc)| {
                (self.key_fn)(&key, &doc)
                    .into_iter()
                    .map(move |entry_key| IndexEntry::new(entry_key, key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.index_order(b));
        entries
    }
}

impl Index for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn scan(&self, request: &ScanRequest, conn: &IndexConnection) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.fail_with.lock().clone() {
            conn.send_error(err);
            return;
        }
        let offset = request.offset.unwrap_or(0) as usize;
        let limit = match request.limit {
            Some(l) if !self.ignore_limit.load(Ordering::Relaxed) => l as usize,
            _ => usize::MAX,
        };
        let budget = self.timeout_every.load(Ordering::Relaxed);
        let selected = self
            .entries()
            .into_iter()
            .filter(|e| request.selects(&e.entry_key, &e.primary_key))
            .skip(offset)
            .take(limit);
        let mut sent = 0;
        for entry in selected {
            if budget > 0 && sent == budget {
                let hook = self.on_timeout.lock().take();
                if let Some(hook) = hook {
                    hook();
                }
                conn.send_timeout();
                return;
            }
            if !conn.send_entry(entry) {
                return;
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            sent += 1;
        }
        conn.close();
    }
}

/// Substring search over one string field. The score is the number of
/// occurrences of the term.
#[derive(Debug)]
pub struct MemorySearchIndex {
    name: String,
    keyspace: Arc<MemoryKeyspace>,
    field: String,
    delivered: AtomicUsize,
}

impl MemorySearchIndex {
    pub fn new(name: impl Into<String>, keyspace: Arc<MemoryKeyspace>, field: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            keyspace,
            field: field.into(),
            delivered: AtomicUsize::new(0),
        })
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl SearchIndex for MemorySearchIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(&self, request: &SearchRequest, conn: &IndexConnection) {
        let term = match &request.query {
            Value::String(term) if !term.is_empty() => term.to_lowercase(),
            other => {
                conn.send_error(DatastoreError::scan_failed(
                    &self.name,
                    format!("unsupported search query {other}"),
                ));
                return;
            }
        };
        let offset = request.offset.unwrap_or(0) as usize;
        let limit = request.limit.map_or(usize::MAX, |l| l as usize);
        let hits = self
            .keyspace
            .snapshot()
            .into_iter()
            .filter_map(|(key, doc)| {
                let text = lookup(&doc, &self.field)?.as_str()?.to_lowercase();
                let score = text.matches(term.as_str()).count();
                (score > 0).then(|| IndexEntry {
                    entry_key: vec![Value::String(key.clone())],
                    primary_key: key,
                    meta: Some(json!({ "score": score })),
                })
            })
            .skip(offset)
            .take(limit);
        for hit in hits {
            if !conn.send_entry(hit) {
                return;
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        conn.close();
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, part| current.get(part))
}
