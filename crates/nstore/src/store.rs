//! The object store: lazy identity, debounced transactional writes, and
//! single-instance loading over a [`BackingStore`].

use std::collections::HashSet;
use std::sync::Arc;

use nstore_backing::BackingStore;
use nstore_types::{is_root_key, Pid, Record, TypeError, NULL_PID};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::ActiveObjectCache;
use crate::codec::{Decoder, Encoder};
use crate::collector::Collector;
use crate::config::{CorruptionPolicy, StoreConfig};
use crate::dirty::DirtySet;
use crate::error::{StoreError, StoreResult};
use crate::event::{EventStream, StoreEvent};
use crate::inspect::{self, VerifyReport};
use crate::registry::TypeRegistry;
use crate::scheduler::{Task, WriteScheduler};
use crate::stats::StoreStats;
use crate::storable::{ObjectHandle, Storable, StorableType};

/// Object store over a shared backing store.
///
/// All operations take `&mut self`; the only suspension points are the
/// backing store's `open`, `commit` and `clear`.
pub struct ObjectStore {
    backing: Arc<dyn BackingStore>,
    registry: TypeRegistry,
    config: StoreConfig,
    cache: ActiveObjectCache,
    dirty: DirtySet,
    scheduler: WriteScheduler,
    events: broadcast::Sender<StoreEvent>,
    read_only: bool,
    opened: bool,
    /// Nesting depth of in-progress lookups.
    load_depth: usize,
    /// Loaded objects whose `after_load` runs when `load_depth` returns to 0.
    awaiting_after_load: Vec<ObjectHandle>,
}

impl ObjectStore {
    pub fn new(backing: Arc<dyn BackingStore>, registry: TypeRegistry) -> Self {
        Self::with_config(backing, registry, StoreConfig::default())
    }

    pub fn with_config(
        backing: Arc<dyn BackingStore>,
        registry: TypeRegistry,
        config: StoreConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            backing,
            registry,
            read_only: config.read_only,
            config,
            cache: ActiveObjectCache::new(),
            dirty: DirtySet::new(),
            scheduler: WriteScheduler::new(),
            events,
            opened: false,
            load_depth: 0,
            awaiting_after_load: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Open the backing store, collect garbage once, and announce it.
    pub async fn open(&mut self) -> StoreResult<()> {
        if self.opened {
            return Err(StoreError::AlreadyOpen);
        }
        if !self.backing.is_open() {
            self.backing.open().await?;
        }

        let collected = if self.config.collect_on_open && !self.read_only {
            self.collect().await?
        } else {
            0
        };
        self.opened = true;
        info!(collected, "object store opened");
        self.emit(StoreEvent::Opened { collected });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.backing
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.read_only {
            Err(StoreError::WriteToReadOnly)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ---------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------

    /// Add a newly created object. It has no pid yet and is marked dirty.
    pub fn insert<T: Storable>(&mut self, obj: T) -> ObjectHandle {
        let handle = self.cache.insert(Box::new(obj));
        self.queue_dirty(handle);
        handle
    }

    pub fn object(&self, handle: ObjectHandle) -> StoreResult<&dyn Storable> {
        self.cache.get(handle)
    }

    pub fn get<T: Storable>(&self, handle: ObjectHandle) -> StoreResult<&T> {
        self.cache
            .get(handle)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or(StoreError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Typed mutable access. Does not mark the object dirty.
    pub fn get_mut<T: Storable>(&mut self, handle: ObjectHandle) -> StoreResult<&mut T> {
        self.cache
            .get_mut(handle)?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(StoreError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Mutate an object and mark it dirty.
    pub fn modify<T: Storable, R>(
        &mut self,
        handle: ObjectHandle,
        f: impl FnOnce(&mut T) -> R,
    ) -> StoreResult<R> {
        let result = f(self.get_mut::<T>(handle)?);
        self.mark_dirty(handle)?;
        Ok(result)
    }

    /// Flag an object as diverged from storage. Idempotent.
    pub fn mark_dirty(&mut self, handle: ObjectHandle) -> StoreResult<()> {
        self.cache.ensure_live(handle)?;
        self.queue_dirty(handle);
        Ok(())
    }

    fn queue_dirty(&mut self, handle: ObjectHandle) {
        self.dirty.insert(handle);
        // Also covers objects left dirty by a failed flush.
        if self.scheduler.schedule(Task::Flush, self.config.flush_delay()) {
            debug!(%handle, "scheduled flush");
        }
    }

    pub fn is_dirty(&self, handle: ObjectHandle) -> bool {
        self.dirty.contains(handle)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Number of live objects in the cache.
    pub fn live_count(&self) -> usize {
        self.cache.len()
    }

    pub fn pid(&self, handle: ObjectHandle) -> Option<&Pid> {
        self.cache.pid_of(handle)
    }

    /// The object's pid, generating one if needed. A newly identified object
    /// is marked dirty.
    pub fn assign_pid(&mut self, handle: ObjectHandle) -> StoreResult<Pid> {
        let backing = Arc::clone(&self.backing);
        let (pid, fresh) = self
            .cache
            .assign_pid(handle, |p| matches!(backing.has_key(p.as_str()), Ok(true)))?;
        if fresh {
            self.queue_dirty(handle);
        }
        Ok(pid)
    }

    /// Live handle for a pid, without touching storage.
    pub fn cached(&self, pid: &Pid) -> Option<ObjectHandle> {
        self.cache.handle_for(pid)
    }

    /// Drop a clean object from the cache. A later lookup of its pid loads
    /// a new instance.
    pub fn evict(&mut self, handle: ObjectHandle) -> StoreResult<()> {
        if self.dirty.contains(handle) {
            return Err(StoreError::EvictDirty(handle));
        }
        self.cache.evict(handle)?;
        debug!(%handle, "evicted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    /// The live object for `pid`, loading it (and whatever it references)
    /// on a cache miss. `"null"` and missing records give `None`.
    pub fn lookup(&mut self, pid: &str) -> StoreResult<Option<ObjectHandle>> {
        if pid == NULL_PID {
            return Ok(None);
        }
        let pid = Pid::parse(pid)?;
        self.resolve(&pid, None)
    }

    /// Lookup entry point shared with the decoder. `referrer` is the object
    /// whose field named `pid`, if any.
    pub(crate) fn resolve(
        &mut self,
        pid: &Pid,
        referrer: Option<ObjectHandle>,
    ) -> StoreResult<Option<ObjectHandle>> {
        match self.load(pid) {
            Ok(handle) => Ok(Some(handle)),
            Err(StoreError::CorruptReference(missing)) => {
                self.recover_from_corruption(&missing, referrer);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn load(&mut self, pid: &Pid) -> StoreResult<ObjectHandle> {
        if let Some(handle) = self.cache.handle_for(pid) {
            return Ok(handle);
        }

        let raw = self
            .backing
            .get(pid.as_str())?
            .ok_or_else(|| StoreError::CorruptReference(pid.clone()))?;
        let record = match Record::from_json(&raw) {
            Ok(record) => record,
            Err(e) => {
                error!(%pid, error = %e, "unreadable record, store is now read-only");
                self.read_only = true;
                return Err(e.into());
            }
        };

        let obj = self.registry.instantiate(&record.type_name)?;
        let handle = self.cache.insert(obj);
        // Identity first: references back to this pid resolve to this
        // instance while it is still being populated.
        self.cache.force_set_pid(handle, pid.clone())?;

        let mut obj = self.cache.take(handle)?;
        self.load_depth += 1;
        let populated = obj.load_from_record(&record, &mut Decoder::new(self, handle));
        self.load_depth -= 1;
        self.cache.restore(handle, obj);

        if let Err(e) = populated {
            error!(%pid, error = %e, "failed to load object, store is now read-only");
            self.read_only = true;
            let _ = self.cache.evict(handle);
            // Objects that did load stay cached and still get their hook.
            if self.load_depth == 0 {
                self.run_after_load_hooks();
            }
            return Err(e);
        }
        debug!(%pid, type_name = %record.type_name, "loaded");

        self.awaiting_after_load.push(handle);
        if self.load_depth == 0 {
            self.run_after_load_hooks();
        }
        Ok(handle)
    }

    fn run_after_load_hooks(&mut self) {
        for handle in std::mem::take(&mut self.awaiting_after_load) {
            if let Ok(obj) = self.cache.get_mut(handle) {
                obj.after_load();
            }
        }
    }

    fn recover_from_corruption(&mut self, missing: &Pid, referrer: Option<ObjectHandle>) {
        warn!(pid = %missing, "missing pid");
        match self.config.corruption_policy {
            CorruptionPolicy::Wipe => {
                if self.scheduler.schedule(Task::Wipe, std::time::Duration::ZERO) {
                    warn!("clearing database because corruption found");
                }
            }
            CorruptionPolicy::Detach => {
                if let Some(referrer) = referrer {
                    self.queue_dirty(referrer);
                }
            }
        }
    }

    /// The root object stored under `pid`, or a fresh `T` bound to it.
    ///
    /// A fresh root takes `pid` as-is and is marked dirty.
    pub fn root_instance<T: StorableType>(&mut self, pid: &str) -> StoreResult<ObjectHandle> {
        let pid = Pid::root(pid).map_err(|e| match e {
            TypeError::NotRootPid(s) => StoreError::InvalidRootPid(s),
            other => other.into(),
        })?;
        if let Some(handle) = self.cache.handle_for(&pid) {
            return Ok(handle);
        }
        if self.backing.has_key(pid.as_str())? {
            if let Some(handle) = self.resolve(&pid, None)? {
                return Ok(handle);
            }
        }
        let handle = self.cache.insert(Box::new(T::default()));
        self.cache.force_set_pid(handle, pid)?;
        self.queue_dirty(handle);
        Ok(handle)
    }

    // ---------------------------------------------------------------
    // Writing
    // ---------------------------------------------------------------

    /// Store every dirty object in one transaction. Returns the number of
    /// records written.
    pub async fn flush(&mut self) -> StoreResult<usize> {
        self.ensure_writable()?;
        if !self.backing.is_open() {
            return Err(StoreError::NotOpen);
        }
        if self.dirty.is_empty() {
            self.scheduler.cancel(Task::Flush);
            debug!("no dirty objects to store");
            return Ok(0);
        }

        self.scheduler.begin(Task::Flush);
        let result = self.store_dirty_objects().await;
        self.scheduler.finish(Task::Flush);

        let stored = result?;
        info!(stored, "flushed dirty objects");
        self.emit(StoreEvent::Flushed { stored });
        Ok(stored)
    }

    async fn store_dirty_objects(&mut self) -> StoreResult<usize> {
        self.backing.begin()?;
        let mut drained = Vec::new();
        let outcome = self.drain_waves(&mut drained);

        let outcome = match outcome {
            Ok(total) => self.backing.commit().await.map(|_| total).map_err(StoreError::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(total) => Ok(total),
            Err(e) => {
                warn!(error = %e, "flush failed, rolling back");
                if self.backing.in_transaction() {
                    if let Err(rollback) = self.backing.rollback() {
                        error!(error = %rollback, "rollback failed");
                    }
                }
                self.dirty.restore(drained);
                Err(e)
            }
        }
    }

    /// Store waves until one comes up empty. Objects dirtied while storing
    /// land in the next wave; storing a pid twice is an error.
    fn drain_waves(&mut self, drained: &mut Vec<ObjectHandle>) -> StoreResult<usize> {
        let mut stored_pids: HashSet<Pid> = HashSet::new();
        let mut total = 0;
        loop {
            let wave = self.dirty.begin_wave();
            if wave.is_empty() {
                break;
            }
            drained.extend(wave.iter().copied());
            let mut wave_count = 0;
            for handle in wave {
                let result = self.store_object(handle, &mut stored_pids);
                self.dirty.complete(handle);
                if result? {
                    wave_count += 1;
                }
            }
            debug!(wave_count, "stored wave");
            total += wave_count;
        }
        Ok(total)
    }

    /// Returns `false` for objects evicted while dirty was pending.
    fn store_object(
        &mut self,
        handle: ObjectHandle,
        stored_pids: &mut HashSet<Pid>,
    ) -> StoreResult<bool> {
        if !self.cache.is_live(handle) {
            return Ok(false);
        }
        // Being stored right now, so no dirty side effect.
        let backing = Arc::clone(&self.backing);
        let (pid, _) = self
            .cache
            .assign_pid(handle, |p| matches!(backing.has_key(p.as_str()), Ok(true)))?;
        if !stored_pids.insert(pid.clone()) {
            return Err(StoreError::DoubleStore(pid));
        }

        let mut obj = self.cache.take(handle)?;
        let written = self.write_record(handle, &pid, obj.as_mut());
        self.cache.restore(handle, obj);
        written?;
        Ok(true)
    }

    fn write_record(
        &mut self,
        handle: ObjectHandle,
        pid: &Pid,
        obj: &mut dyn Storable,
    ) -> StoreResult<()> {
        let mut record = {
            let mut enc = Encoder::new(
                &mut self.cache,
                &mut self.dirty,
                self.backing.as_ref(),
                handle,
            );
            obj.to_record(&mut enc)?
        };
        record.type_name = obj.type_name().to_string();
        obj.before_store(&mut record);
        let json = record.to_json()?;
        self.backing.put(pid.as_str(), &json)?;
        debug!(%pid, bytes = json.len(), "stored");
        obj.after_store(&record);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Collection
    // ---------------------------------------------------------------

    /// Flush, then delete every record unreachable from a root pid. Returns
    /// the number of records deleted.
    pub async fn collect(&mut self) -> StoreResult<usize> {
        self.ensure_writable()?;
        if !self.backing.is_open() {
            return Err(StoreError::NotOpen);
        }
        if !self.dirty.is_empty() {
            self.flush().await?;
            if !self.dirty.is_empty() {
                return Err(StoreError::ReentrantDirtyDuringCollect {
                    remaining: self.dirty.len(),
                });
            }
        }

        let report = Collector::new(self.backing.as_ref(), &self.registry)
            .collect()
            .await?;

        for key in &report.deleted {
            let Ok(pid) = Pid::parse(key) else { continue };
            if let Some(handle) = self.cache.forget_pid(&pid) {
                debug!(%pid, %handle, "live object lost its record");
            }
        }

        let deleted = report.deleted.len();
        self.emit(StoreEvent::Collected { deleted });
        Ok(deleted)
    }

    /// Clear the backing store and queue every live object for re-storing.
    pub async fn wipe(&mut self) -> StoreResult<()> {
        self.ensure_writable()?;
        warn!("clearing all data");
        self.backing.clear().await?;
        let handles: Vec<ObjectHandle> = self.cache.handles().collect();
        for handle in handles {
            self.queue_dirty(handle);
        }
        self.emit(StoreEvent::Wiped);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------

    /// Whether a task is waiting for its deadline.
    pub fn is_scheduled(&self, task: Task) -> bool {
        self.scheduler.is_pending(task)
    }

    /// Run every scheduled task whose deadline has passed. Returns how many
    /// ran.
    pub async fn run_due(&mut self) -> StoreResult<usize> {
        let due = self.scheduler.due(Instant::now());
        for task in &due {
            self.run_task(*task).await?;
        }
        Ok(due.len())
    }

    /// Wait for and run scheduled tasks until none remain.
    pub async fn run_scheduled(&mut self) -> StoreResult<()> {
        while let Some((_, at)) = self.scheduler.next_due() {
            tokio::time::sleep_until(at).await;
            self.run_due().await?;
        }
        Ok(())
    }

    async fn run_task(&mut self, task: Task) -> StoreResult<()> {
        self.scheduler.cancel(task);
        match task {
            Task::Flush => self.flush().await.map(|_| ()),
            Task::Wipe => {
                self.scheduler.begin(Task::Wipe);
                let result = self.wipe().await;
                self.scheduler.finish(Task::Wipe);
                result
            }
        }
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    /// Record count and size, or `None` while closed.
    pub fn stats(&self) -> StoreResult<Option<StoreStats>> {
        if !self.backing.is_open() {
            return Ok(None);
        }
        Ok(Some(StoreStats {
            records: self.backing.size()?,
            bytes: self.backing.total_bytes()?,
            live_objects: self.cache.len(),
            dirty_objects: self.dirty.len(),
        }))
    }

    /// One-line summary such as `12 objects, 3.4 KB`.
    pub fn short_stats(&self) -> StoreResult<String> {
        Ok(match self.stats()? {
            Some(stats) => stats.short(),
            None => "closed".to_string(),
        })
    }

    /// Indented dump of the stored record at `pid` and its children.
    pub fn dump(&self, pid: &str, max_depth: usize) -> StoreResult<String> {
        inspect::render_tree(self.backing.as_ref(), &self.registry, pid, max_depth)
    }

    /// Dump of every root record, three levels deep.
    pub fn dump_roots(&self) -> StoreResult<String> {
        let mut out = String::new();
        for key in self.backing.keys()? {
            if is_root_key(&key) {
                out.push_str(&self.dump(&key, 3)?);
            }
        }
        Ok(out)
    }

    /// Check stored records for unreadable values and dangling references.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        inspect::verify(self.backing.as_ref(), &self.registry)
    }

    // ---------------------------------------------------------------
    // Application transactions
    // ---------------------------------------------------------------

    /// Not implemented; flushes are the only transactions.
    pub fn begin(&mut self) -> StoreResult<()> {
        Err(StoreError::TransactionMisuse("begin"))
    }

    /// Not implemented; flushes are the only transactions.
    pub fn commit(&mut self) -> StoreResult<()> {
        Err(StoreError::TransactionMisuse("commit"))
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("opened", &self.opened)
            .field("read_only", &self.read_only)
            .field("live_objects", &self.cache.len())
            .field("dirty_objects", &self.dirty.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Echo, Leaf, Node, Root};
    use nstore_backing::{BackingError, FileBackingStore, InMemoryBackingStore};

    async fn open_store() -> (ObjectStore, Arc<InMemoryBackingStore>) {
        let backing = Arc::new(InMemoryBackingStore::new());
        let mut store = ObjectStore::new(backing.clone(), fixtures::registry());
        store.open().await.unwrap();
        (store, backing)
    }

    fn seeded(entries: &[(&str, &str)]) -> Arc<InMemoryBackingStore> {
        Arc::new(InMemoryBackingStore::with_entries(
            entries.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        ))
    }

    fn config(f: impl FnOnce(&mut StoreConfig)) -> StoreConfig {
        let mut config = StoreConfig::default();
        f(&mut config);
        config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_twice_fails() {
        let (mut store, _) = open_store().await;
        assert!(matches!(store.open().await, Err(StoreError::AlreadyOpen)));
    }

    #[tokio::test]
    async fn flush_before_open_fails() {
        let backing = Arc::new(InMemoryBackingStore::new());
        let mut store = ObjectStore::new(backing, fixtures::registry());
        store.insert(Leaf::named("a"));
        assert!(matches!(store.flush().await, Err(StoreError::NotOpen)));
    }

    #[tokio::test]
    async fn open_collects_orphans_and_announces_it() {
        let backing = seeded(&[
            ("_root", r#"{"type":"Root","children":["Root_123"]}"#),
            ("Root_123", r#"{"type":"Leaf"}"#),
            ("Orphan_999", r#"{"type":"Leaf"}"#),
        ]);
        let mut store = ObjectStore::new(backing.clone(), fixtures::registry());
        let mut events = store.subscribe();
        store.open().await.unwrap();

        assert_eq!(backing.size().unwrap(), 2);
        assert!(!backing.has_key("Orphan_999").unwrap());
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Collected { deleted: 1 });
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Opened { collected: 1 });
    }

    #[tokio::test]
    async fn failed_open_can_be_retried() {
        let backing = seeded(&[("Leaf_9", r#"{"type":"Leaf","name":"orphan","weight":0}"#)]);
        backing.open().await.unwrap();
        // A foreign transaction makes the sweep fail.
        backing.begin().unwrap();

        let mut store = ObjectStore::new(backing.clone(), fixtures::registry());
        let mut events = store.subscribe();
        assert!(matches!(
            store.open().await,
            Err(StoreError::Backing(BackingError::TransactionActive))
        ));
        assert!(!store.is_open());
        assert!(events.try_recv().is_err());

        backing.rollback().unwrap();
        store.open().await.unwrap();
        assert!(store.is_open());
        assert_eq!(backing.size().unwrap(), 0);
    }

    #[tokio::test]
    async fn transactions_are_not_exposed() {
        let (mut store, _) = open_store().await;
        assert!(matches!(store.begin(), Err(StoreError::TransactionMisuse("begin"))));
        assert!(matches!(store.commit(), Err(StoreError::TransactionMisuse("commit"))));
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pid_is_assigned_lazily() {
        let (mut store, _) = open_store().await;
        let leaf = store.insert(Leaf::named("a"));
        assert_eq!(store.pid(leaf), None);
        assert!(store.is_dirty(leaf));

        store.flush().await.unwrap();
        let pid = store.pid(leaf).cloned().unwrap();
        assert_eq!(pid.type_prefix(), Some("Leaf"));
        assert_eq!(store.lookup(pid.as_str()).unwrap(), Some(leaf));
    }

    #[tokio::test]
    async fn lookup_of_null_is_none() {
        let (mut store, _) = open_store().await;
        assert_eq!(store.lookup("null").unwrap(), None);
    }

    #[tokio::test]
    async fn root_instance_is_created_once() {
        let (mut store, backing) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        assert_eq!(store.pid(root).map(Pid::as_str), Some("_root"));
        assert!(store.is_dirty(root));
        assert_eq!(store.root_instance::<Root>("_root").unwrap(), root);

        store.flush().await.unwrap();
        assert!(backing.has_key("_root").unwrap());
    }

    #[tokio::test]
    async fn root_pid_needs_sentinel() {
        let (mut store, _) = open_store().await;
        assert!(matches!(
            store.root_instance::<Root>("root"),
            Err(StoreError::InvalidRootPid(pid)) if pid == "root"
        ));
    }

    #[tokio::test]
    async fn typed_access_checks_the_type() {
        let (mut store, _) = open_store().await;
        let leaf = store.insert(Leaf::named("a"));
        assert_eq!(store.get::<Leaf>(leaf).unwrap().name, "a");
        assert!(matches!(
            store.get::<Node>(leaf),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Round trip
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn graph_with_cycle_round_trips() {
        let (mut store, backing) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        let a = store.insert(Node::labeled("a"));
        let b = store.insert(Node::labeled("b"));
        store.modify::<Node, _>(a, |n| n.next = Some(b)).unwrap();
        store.modify::<Node, _>(b, |n| n.next = Some(a)).unwrap();
        store
            .modify::<Root, _>(root, |r| {
                r.title = "home".into();
                r.children.push(a);
                r.favorite = Some(b);
            })
            .unwrap();
        assert_eq!(store.flush().await.unwrap(), 3);
        assert_eq!(store.get::<Node>(a).unwrap().stores, 1);

        let mut fresh = ObjectStore::new(backing.clone(), fixtures::registry());
        fresh.open().await.unwrap();
        let root = fresh.root_instance::<Root>("_root").unwrap();
        let (title, children, favorite) = {
            let r = fresh.get::<Root>(root).unwrap();
            (r.title.clone(), r.children.clone(), r.favorite)
        };
        assert_eq!(title, "home");
        assert_eq!(children.len(), 1);

        let a = children[0];
        let a_node = fresh.get::<Node>(a).unwrap();
        assert_eq!(a_node.label, "a");
        assert_eq!(a_node.loads, 1);
        let b = a_node.next.unwrap();
        assert_eq!(favorite, Some(b));

        let b_node = fresh.get::<Node>(b).unwrap();
        assert_eq!(b_node.label, "b");
        assert_eq!(b_node.next, Some(a));
        assert_eq!(fresh.dirty_count(), 0);
    }

    #[tokio::test]
    async fn lookup_returns_the_same_instance() {
        let (mut store, backing) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        let leaf = store.insert(Leaf::named("x"));
        store.modify::<Root, _>(root, |r| r.children.push(leaf)).unwrap();
        store.flush().await.unwrap();
        let pid = store.pid(leaf).cloned().unwrap();

        let mut fresh = ObjectStore::new(backing, fixtures::registry());
        fresh.open().await.unwrap();
        let first = fresh.lookup(pid.as_str()).unwrap().unwrap();
        let second = fresh.lookup(pid.as_str()).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(fresh.live_count(), 1);
    }

    #[tokio::test]
    async fn file_backing_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = ObjectStore::new(Arc::new(FileBackingStore::new(&path)), fixtures::registry());
        store.open().await.unwrap();
        let root = store.root_instance::<Root>("_root").unwrap();
        let leaf = store.insert(Leaf { name: "kept".into(), weight: 7 });
        store.modify::<Root, _>(root, |r| r.children.push(leaf)).unwrap();
        store.flush().await.unwrap();
        drop(store);

        let mut store = ObjectStore::new(Arc::new(FileBackingStore::new(&path)), fixtures::registry());
        store.open().await.unwrap();
        let root = store.root_instance::<Root>("_root").unwrap();
        let leaf = store.get::<Root>(root).unwrap().children[0];
        let leaf = store.get::<Leaf>(leaf).unwrap();
        assert_eq!((leaf.name.as_str(), leaf.weight), ("kept", 7));
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn clean_flush_skips_the_transaction() {
        let (mut store, backing) = open_store().await;
        assert_eq!(store.flush().await.unwrap(), 0);
        assert_eq!(backing.commit_stats().commits, 0);
    }

    #[tokio::test]
    async fn flush_emits_event() {
        let (mut store, _) = open_store().await;
        let mut events = store.subscribe();
        store.insert(Leaf::named("a"));
        store.flush().await.unwrap();
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Flushed { stored: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_within_one_interval_share_a_commit() {
        let (mut store, backing) = open_store().await;
        let leaves: Vec<_> = (0..3)
            .map(|i| store.insert(Leaf::named(&format!("leaf-{i}"))))
            .collect();
        for round in 0..5 {
            for leaf in &leaves {
                store.modify::<Leaf, _>(*leaf, |l| l.weight = round).unwrap();
            }
        }
        assert!(store.is_scheduled(Task::Flush));
        assert_eq!(store.run_due().await.unwrap(), 0);

        store.run_scheduled().await.unwrap();
        let stats = backing.commit_stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.last_batch, 3);
        assert!(!store.is_scheduled(Task::Flush));
        assert_eq!(store.dirty_count(), 0);
    }

    #[tokio::test]
    async fn new_references_are_stored_in_the_same_flush() {
        let (mut store, backing) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        store.flush().await.unwrap();

        // Built without going through insert's dirty marking.
        let leaf = store.cache.insert(Box::new(Leaf::named("late")));
        store.modify::<Root, _>(root, |r| r.children.push(leaf)).unwrap();
        assert_eq!(store.flush().await.unwrap(), 2);

        let pid = store.pid(leaf).cloned().unwrap();
        assert!(backing.has_key(pid.as_str()).unwrap());
    }

    #[tokio::test]
    async fn redirty_during_flush_is_a_double_store() {
        let (mut store, backing) = open_store().await;
        let leaf = store.insert(Leaf::named("a"));
        store.insert(Echo { poke: Some(leaf) });

        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::DoubleStore(_)));
        assert_eq!(backing.size().unwrap(), 0);
        assert_eq!(backing.commit_stats().commits, 0);
        assert!(!backing.in_transaction());
        assert_eq!(store.dirty_count(), 2);
    }

    #[tokio::test]
    async fn read_only_store_refuses_writes() {
        let (mut store, _) = open_store().await;
        store.insert(Leaf::named("a"));
        store.set_read_only(true);
        assert!(matches!(store.flush().await, Err(StoreError::WriteToReadOnly)));
        assert!(matches!(store.collect().await, Err(StoreError::WriteToReadOnly)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_rescheduled_by_the_next_change() {
        let (mut store, backing) = open_store().await;
        let leaf = store.insert(Leaf::named("a"));
        store.set_read_only(true);
        assert!(matches!(
            store.run_scheduled().await,
            Err(StoreError::WriteToReadOnly)
        ));
        assert!(store.is_dirty(leaf));
        assert!(!store.is_scheduled(Task::Flush));

        store.set_read_only(false);
        store.modify::<Leaf, _>(leaf, |l| l.weight = 1).unwrap();
        assert!(store.is_scheduled(Task::Flush));

        store.run_scheduled().await.unwrap();
        assert_eq!(backing.size().unwrap(), 1);
        assert_eq!(backing.commit_stats().commits, 1);
    }

    #[tokio::test]
    async fn double_store_leaves_objects_flushable() {
        let (mut store, _) = open_store().await;
        let leaf = store.insert(Leaf::named("a"));
        let echo = store.insert(Echo { poke: Some(leaf) });
        assert!(store.flush().await.is_err());
        assert!(!store.is_scheduled(Task::Flush));

        store.modify::<Echo, _>(echo, |e| e.poke = None).unwrap();
        assert!(store.is_scheduled(Task::Flush));
        assert_eq!(store.flush().await.unwrap(), 2);
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unlinked_cycle_is_collected() {
        let (mut store, backing) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        let a = store.insert(Node::labeled("a"));
        let b = store.insert(Node::labeled("b"));
        store.modify::<Node, _>(a, |n| n.next = Some(b)).unwrap();
        store.modify::<Node, _>(b, |n| n.next = Some(a)).unwrap();
        store.modify::<Root, _>(root, |r| r.children.push(a)).unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.collect().await.unwrap(), 0);
        assert_eq!(backing.size().unwrap(), 3);

        store.modify::<Root, _>(root, |r| r.children.clear()).unwrap();
        assert_eq!(store.collect().await.unwrap(), 2);
        assert_eq!(backing.keys().unwrap(), vec!["_root"]);
        assert_eq!(store.pid(a), None);
        assert_eq!(store.pid(b), None);
    }

    #[tokio::test]
    async fn unflushed_live_objects_do_not_keep_records() {
        let (mut store, backing) = open_store().await;
        let leaf = store.insert(Leaf::named("floating"));
        store.flush().await.unwrap();
        assert_eq!(backing.size().unwrap(), 1);

        assert_eq!(store.collect().await.unwrap(), 1);
        assert_eq!(backing.size().unwrap(), 0);
        assert!(store.object(leaf).is_ok());
    }

    // -----------------------------------------------------------------------
    // Loading failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unknown_type_is_fatal() {
        let backing = seeded(&[("Ghost_1", r#"{"type":"Ghost"}"#)]);
        let mut store = ObjectStore::with_config(
            backing,
            fixtures::registry(),
            config(|c| c.collect_on_open = false),
        );
        store.open().await.unwrap();
        assert!(matches!(
            store.lookup("Ghost_1"),
            Err(StoreError::MissingType(name)) if name == "Ghost"
        ));
    }

    #[tokio::test]
    async fn unreadable_record_makes_the_store_read_only() {
        let backing = seeded(&[("_a", "not json")]);
        let mut store = ObjectStore::with_config(
            backing,
            fixtures::registry(),
            config(|c| c.collect_on_open = false),
        );
        store.open().await.unwrap();
        assert!(matches!(store.lookup("_a"), Err(StoreError::Type(_))));
        assert!(store.is_read_only());
    }

    #[tokio::test]
    async fn failed_load_still_runs_hooks_of_loaded_objects() {
        let backing = seeded(&[
            ("_root", r#"{"type":"Root","title":"r","children":["Node_1","Node_2"]}"#),
            ("Node_1", r#"{"type":"Node","label":"ok","next":{"pid":"null"}}"#),
            ("Node_2", r#"{"type":"Node"}"#),
        ]);
        let mut store = ObjectStore::with_config(
            backing,
            fixtures::registry(),
            config(|c| c.collect_on_open = false),
        );
        store.open().await.unwrap();

        assert!(matches!(
            store.lookup("_root"),
            Err(StoreError::Type(TypeError::MissingField { .. }))
        ));
        let loaded = store.cached(&Pid::parse("Node_1").unwrap()).unwrap();
        assert_eq!(store.get::<Node>(loaded).unwrap().loads, 1);
        assert!(store.cached(&Pid::parse("Node_2").unwrap()).is_none());
        assert!(store.cached(&Pid::parse("_root").unwrap()).is_none());
    }

    #[tokio::test]
    async fn detach_policy_rewrites_dangling_edge() {
        let backing = seeded(&[(
            "_a",
            r#"{"type":"Node","label":"a","next":{"pid":"Node_404"}}"#,
        )]);
        let mut store = ObjectStore::with_config(
            backing.clone(),
            fixtures::registry(),
            config(|c| c.corruption_policy = CorruptionPolicy::Detach),
        );
        store.open().await.unwrap();

        let a = store.root_instance::<Node>("_a").unwrap();
        assert_eq!(store.get::<Node>(a).unwrap().next, None);
        assert!(store.is_dirty(a));
        assert!(!store.is_scheduled(Task::Wipe));

        store.flush().await.unwrap();
        let raw = backing.committed_value("_a").unwrap();
        assert!(raw.contains(r#""next":{"pid":"null"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn wipe_policy_clears_and_restores_live_graph() {
        let backing = seeded(&[
            ("_a", r#"{"type":"Node","label":"a","next":{"pid":"Node_404"}}"#),
            ("_b", r#"{"type":"Leaf","name":"b","weight":2}"#),
        ]);
        let mut store = ObjectStore::new(backing.clone(), fixtures::registry());
        store.open().await.unwrap();
        let mut events = store.subscribe();

        let a = store.root_instance::<Node>("_a").unwrap();
        assert_eq!(store.get::<Node>(a).unwrap().next, None);
        assert!(store.is_scheduled(Task::Wipe));

        assert_eq!(store.run_due().await.unwrap(), 1);
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Wiped);
        assert_eq!(backing.size().unwrap(), 0);
        assert!(store.is_dirty(a));

        store.flush().await.unwrap();
        assert_eq!(backing.keys().unwrap(), vec!["_a"]);
    }

    // -----------------------------------------------------------------------
    // Eviction and inspection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn evicted_object_reloads_as_new_instance() {
        let (mut store, _) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        let leaf = store.insert(Leaf::named("a"));
        store.modify::<Root, _>(root, |r| r.children.push(leaf)).unwrap();
        assert!(matches!(store.evict(leaf), Err(StoreError::EvictDirty(_))));

        store.flush().await.unwrap();
        let pid = store.pid(leaf).cloned().unwrap();
        store.evict(leaf).unwrap();
        assert!(matches!(store.object(leaf), Err(StoreError::StaleHandle(_))));
        assert!(matches!(store.mark_dirty(leaf), Err(StoreError::StaleHandle(_))));

        let reloaded = store.lookup(pid.as_str()).unwrap().unwrap();
        assert_ne!(reloaded, leaf);
        assert_eq!(store.get::<Leaf>(reloaded).unwrap().name, "a");
    }

    #[tokio::test]
    async fn stats_describe_the_backing_store() {
        let backing = Arc::new(InMemoryBackingStore::new());
        let mut store = ObjectStore::new(backing, fixtures::registry());
        assert_eq!(store.short_stats().unwrap(), "closed");

        store.open().await.unwrap();
        store.root_instance::<Root>("_root").unwrap();
        store.flush().await.unwrap();
        let stats = store.stats().unwrap().unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.live_objects, 1);
        assert!(store.short_stats().unwrap().starts_with("1 objects, "));
    }

    #[tokio::test]
    async fn dump_shows_roots() {
        let (mut store, _) = open_store().await;
        let root = store.root_instance::<Root>("_root").unwrap();
        let leaf = store.insert(Leaf::named("shown"));
        store.modify::<Root, _>(root, |r| r.children.push(leaf)).unwrap();
        store.flush().await.unwrap();

        let dump = store.dump_roots().unwrap();
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.contains("\"shown\""));
        assert!(store.verify().unwrap().is_clean());
    }
}
