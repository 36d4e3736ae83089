//! Spooling stack
//!
//! A LIFO stack whose in-memory portion is bounded by the bundle size. Once
//! the buffer grows past that bound, the oldest values are written out as a
//! bundle file; once the buffer runs dry, the newest bundle is read back.
//!
//! # Layout
//!
//! ```text
//!            top
//!             │
//!   buffer:  [v7 v6 v5]          (VecDeque, tail = top)
//!   stack.1: [v4 v3 v2]          (max bundle)
//!   stack.0: [v1 v0]             (min bundle)
//!             │
//!           bottom
//! ```
//!
//! Reading the buffer tail-to-head and then each bundle from the highest
//! index down always yields the logical stack, top to bottom.
//!
//! # Concurrency
//!
//! Every public operation, including the lazy open on first access, runs
//! under one mutex per stack. Filesystem work happens while the lock is held.
//! Two processes sharing a root directory are not supported.

use crate::bundle::{BundleRange, BundleStore};
use crate::codec::{Codec, Format};
use crate::config::StackConfig;
use crate::error::{Result, StackError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// In-memory state that exists once the root has been read
struct Spool<T> {
    buffer: VecDeque<T>,
    bundles: Option<BundleRange>,
}

/// A stack that spools overflow to sequential bundle files
pub struct SpoolingStack<T, C = Format> {
    config: StackConfig,
    codec: C,
    store: BundleStore,
    /// `None` until the root has been read (and again after a reset)
    state: Mutex<Option<Spool<T>>>,
}

impl<T> SpoolingStack<T, Format>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a stack using the format named in the configuration
    ///
    /// Nothing touches the filesystem until the first operation.
    pub fn new(config: StackConfig) -> Result<Self> {
        let format = config.format;
        Self::with_codec(config, format)
    }
}

impl<T, C> SpoolingStack<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Create a stack with a caller-supplied codec
    ///
    /// `config.format` is ignored; the codec decides the bundle encoding.
    pub fn with_codec(config: StackConfig, codec: C) -> Result<Self> {
        config.validate()?;
        let store = BundleStore::new(&config.root, &config.prefix);
        Ok(SpoolingStack {
            config,
            codec,
            store,
            state: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Push a value onto the top of the stack
    ///
    /// May write one new bundle. If that spill fails under the strict
    /// policy, the value stays pushed and the error is returned.
    pub fn push(&self, value: T) -> Result<()> {
        let mut guard = self.lock();
        let spool = self.open(&mut guard)?;

        // Keep bundles in order when pushes and pops interleave.
        if spool.buffer.is_empty() {
            self.fill(spool)?;
        }

        spool.buffer.push_back(value);

        if spool.buffer.len() > self.config.bundle_size {
            debug!(
                root = %self.root().display(),
                len = spool.buffer.len(),
                "Spool has overflowed"
            );
            self.spill(spool, self.config.bundle_size, self.config.skip_on_error)?;
        }
        Ok(())
    }

    /// Remove and return the most recently pushed value
    ///
    /// Fails with [`StackError::EmptyStack`] when neither memory nor disk
    /// holds anything.
    pub fn pop(&self) -> Result<T> {
        let mut guard = self.lock();
        let spool = self.open(&mut guard)?;

        if spool.buffer.is_empty() {
            self.fill(spool)?;
        }

        spool.buffer.pop_back().ok_or(StackError::EmptyStack)
    }

    /// Move the oldest in-memory values to a new bundle
    ///
    /// With `count == None` the whole buffer is written. With `Some(count)`
    /// exactly `count` values are written, and only if `count` is positive
    /// and the buffer holds more than `count`; otherwise this is a no-op. The newest values stay in
    /// memory, so the top of the stack is never disturbed.
    ///
    /// `skip_on_error` drops values that fail to serialize instead of
    /// aborting. In strict mode a failure leaves the buffer untouched.
    pub fn flush(&self, count: Option<usize>, skip_on_error: bool) -> Result<()> {
        let mut guard = self.lock();
        let Some(spool) = guard.as_mut() else {
            return Ok(());
        };

        let len = spool.buffer.len();
        let count = match count {
            None if len == 0 => return Ok(()),
            None => len,
            Some(0) => return Ok(()),
            Some(count) if len <= count => return Ok(()),
            Some(count) => count,
        };

        self.spill(spool, count, skip_on_error)
    }

    /// Discard everything, in memory and on disk
    ///
    /// Deletes the whole root directory. Resetting an already-reset stack is
    /// a no-op.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.lock();
        debug!(root = %self.root().display(), "Resetting spool");

        *guard = None;

        if let Err(e) = self.store.destroy() {
            warn!(root = %self.root().display(), error = %e, "Failed to remove spool directory");
        }

        if self.root().exists() {
            return Err(StackError::ResetIncomplete(self.root().to_path_buf()));
        }
        Ok(())
    }

    /// Flush every in-memory value to disk and drop the stack
    ///
    /// A new stack opened on the same root afterwards sees the same contents.
    pub fn close(self) -> Result<()> {
        self.flush(None, false)
    }

    /// Number of values currently held in memory
    pub fn in_memory_len(&self) -> usize {
        self.lock().as_ref().map_or(0, |spool| spool.buffer.len())
    }

    /// Inclusive range of bundle indices on disk, if any
    pub fn bundle_range(&self) -> Result<Option<(u64, u64)>> {
        let mut guard = self.lock();
        let spool = self.open(&mut guard)?;
        Ok(spool.bundles.map(|r| (r.min, r.max)))
    }

    /// Number of bundle files on disk
    pub fn bundle_count(&self) -> Result<u64> {
        let mut guard = self.lock();
        let spool = self.open(&mut guard)?;
        Ok(spool.bundles.map_or(0, |r| r.len()))
    }

    /// True when nothing is buffered and no bundle exists
    pub fn is_empty(&self) -> Result<bool> {
        let mut guard = self.lock();
        let spool = self.open(&mut guard)?;
        Ok(spool.buffer.is_empty() && spool.bundles.is_none())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Spool<T>>> {
        // State is only mutated after the fallible work for a step succeeds.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the bundle range from disk on first access
    fn open<'a>(&self, state: &'a mut Option<Spool<T>>) -> Result<&'a mut Spool<T>> {
        let spool = match state {
            Some(spool) => spool,
            None => {
                debug!(root = %self.root().display(), "Reading spool directory");
                let bundles = self.store.discover()?;
                debug!(
                    min = ?bundles.map(|r| r.min),
                    max = ?bundles.map(|r| r.max),
                    "Bundles read"
                );
                state.insert(Spool {
                    buffer: VecDeque::new(),
                    bundles,
                })
            }
        };
        Ok(spool)
    }

    /// Reload the newest bundle into the tail of the buffer
    ///
    /// Bundles that decode to nothing are consumed and skipped so they never
    /// hide older values.
    fn fill(&self, spool: &mut Spool<T>) -> Result<()> {
        while spool.buffer.is_empty() {
            let Some(range) = spool.bundles else {
                return Ok(());
            };

            let index = range.max;
            debug!(bundle = %self.store.path(index).display(), "Loading bundle");

            let payload = self.store.read(index)?;
            let values: Vec<T> = match self.codec.decode(&payload) {
                Ok(values) => values,
                Err(source) => {
                    return Err(StackError::Serialization {
                        bundle: self.store.path(index),
                        source,
                    });
                }
            };
            self.store.remove(index)?;

            spool.buffer.extend(values);
            spool.bundles = range.pop();
        }
        Ok(())
    }

    /// Write the oldest `count` buffered values as bundle `max + 1`
    fn spill(&self, spool: &mut Spool<T>, count: usize, skip_on_error: bool) -> Result<()> {
        let index = BundleRange::push(spool.bundles).max;
        let path = self.store.path(index);

        debug!(
            len = spool.buffer.len(),
            count,
            codec = self.codec.name(),
            bundle = %path.display(),
            "Flushing"
        );

        let head = &spool.buffer.make_contiguous()[..count];
        let payload = match self.codec.encode(head) {
            Ok(payload) => Some(payload),
            Err(source) if !skip_on_error => {
                return Err(StackError::Serialization {
                    bundle: path,
                    source,
                });
            }
            Err(_) => self.encode_survivors(head, &path),
        };

        if let Some(payload) = payload {
            self.store.write(index, &payload)?;
            spool.bundles = Some(BundleRange::push(spool.bundles));
        }

        spool.buffer.drain(..count);
        debug!(
            bundle = %path.display(),
            remaining = spool.buffer.len(),
            "Bundle written"
        );
        Ok(())
    }

    /// Encode only the values that serialize on their own
    ///
    /// Returns `None` when nothing survives, in which case no bundle is
    /// written at all.
    fn encode_survivors(&self, values: &[T], path: &Path) -> Option<Vec<u8>> {
        let survivors: Vec<&T> = values
            .iter()
            .enumerate()
            .filter(|(position, value)| {
                match self.codec.encode(std::slice::from_ref(*value)) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(
                            bundle = %path.display(),
                            position,
                            error = %e,
                            "Dropping value that could not be serialized"
                        );
                        false
                    }
                }
            })
            .map(|(_, value)| value)
            .collect();

        if survivors.is_empty() {
            warn!(bundle = %path.display(), "No value in bundle could be serialized");
            return None;
        }

        match self.codec.encode(&survivors) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(
                    bundle = %path.display(),
                    error = %e,
                    "Bundle could not be serialized; dropping it"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};
    use std::fs;

    fn stack(root: &Path, bundle_size: usize) -> SpoolingStack<u32> {
        SpoolingStack::new(StackConfig::new(root).with_bundle_size(bundle_size)).unwrap()
    }

    /// A value whose serialization can be made to fail
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Item {
        id: u32,
        poison: bool,
    }

    impl Serialize for Item {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            use serde::ser::{Error, SerializeStruct};
            if self.poison {
                return Err(S::Error::custom(format!("item {} is poisoned", self.id)));
            }
            let mut s = serializer.serialize_struct("Item", 2)?;
            s.serialize_field("id", &self.id)?;
            s.serialize_field("poison", &self.poison)?;
            s.end()
        }
    }

    fn item(id: u32, poison: bool) -> Item {
        Item { id, poison }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = SpoolingStack::<u32>::new(StackConfig::new("/tmp/x").with_bundle_size(0));
        assert!(matches!(result, Err(StackError::Config(_))));
    }

    #[test]
    fn test_construction_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("spool");
        let s = stack(&root, 3);
        assert!(!root.exists());
        assert_eq!(s.in_memory_len(), 0);
        s.push(1).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_spill_is_strictly_greater_than_bundle_size() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(dir.path(), 3);
        for i in 0..3 {
            s.push(i).unwrap();
        }
        assert_eq!(s.bundle_count().unwrap(), 0);
        assert_eq!(s.in_memory_len(), 3);

        s.push(3).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        assert_eq!(s.in_memory_len(), 1);

        let on_disk: Vec<u32> =
            serde_json::from_slice(&fs::read(dir.path().join("stack.0")).unwrap()).unwrap();
        assert_eq!(on_disk, vec![0, 1, 2]);
    }

    #[test]
    fn test_fill_reloads_newest_bundle_and_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(dir.path(), 2);
        for i in 0..7 {
            s.push(i).unwrap();
        }
        // bundles [0,1] [2,3] [4,5], buffer [6]
        assert_eq!(s.bundle_range().unwrap(), Some((0, 2)));
        assert_eq!(s.pop().unwrap(), 6);
        assert_eq!(s.pop().unwrap(), 5);
        assert!(!dir.path().join("stack.2").exists());
        assert_eq!(s.bundle_range().unwrap(), Some((0, 1)));
        assert_eq!(s.in_memory_len(), 1);
    }

    #[test]
    fn test_push_on_empty_buffer_refills_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(dir.path(), 2);
        for i in 0..3 {
            s.push(i).unwrap();
        }
        s.flush(None, false).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 1)));
        assert_eq!(s.in_memory_len(), 0);

        // Reloads [2], appends 10, no overflow.
        s.push(10).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        assert_eq!(s.in_memory_len(), 2);

        let popped: Vec<u32> = (0..4).map(|_| s.pop().unwrap()).collect();
        assert_eq!(popped, vec![10, 2, 1, 0]);
        assert!(matches!(s.pop(), Err(StackError::EmptyStack)));
    }

    #[test]
    fn test_flush_uninitialized_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("spool");
        let s = stack(&root, 5);
        s.flush(None, true).unwrap();
        s.flush(Some(1), true).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_flush_count_not_exceeded_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(dir.path(), 500);
        for i in 0..5 {
            s.push(i).unwrap();
        }
        s.flush(Some(5), true).unwrap();
        s.flush(Some(9), true).unwrap();
        assert_eq!(s.bundle_count().unwrap(), 0);
        assert_eq!(s.in_memory_len(), 5);
    }

    #[test]
    fn test_flush_zero_count_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(dir.path(), 500);
        s.push(1).unwrap();
        s.flush(Some(0), true).unwrap();
        s.flush(Some(0), false).unwrap();
        assert_eq!(s.bundle_range().unwrap(), None);
        assert!(!dir.path().join("stack.0").exists());
        assert_eq!(s.in_memory_len(), 1);
    }

    #[test]
    fn test_failed_bundle_write_keeps_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("spool");
        let s = stack(&root, 500);
        for i in 0..4 {
            s.push(i).unwrap();
        }
        fs::remove_dir_all(&root).unwrap();

        assert!(matches!(s.flush(None, true), Err(StackError::Io(_))));
        assert!(!root.join("stack.0").exists());
        assert_eq!(s.in_memory_len(), 4);
        assert_eq!(s.bundle_range().unwrap(), None);

        fs::create_dir_all(&root).unwrap();
        s.flush(Some(2), false).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        let popped: Vec<u32> = (0..4).map(|_| s.pop().unwrap()).collect();
        assert_eq!(popped, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_flush_whole_buffer_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.0"), b"[1,2,3,4,5]").unwrap();
        let s = stack(dir.path(), 2);

        // A reload can leave more than the bundle size in memory.
        assert_eq!(s.pop().unwrap(), 5);
        assert_eq!(s.in_memory_len(), 4);

        s.flush(None, false).unwrap();
        assert_eq!(s.in_memory_len(), 0);
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        let on_disk: Vec<u32> =
            serde_json::from_slice(&fs::read(dir.path().join("stack.0")).unwrap()).unwrap();
        assert_eq!(on_disk, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_strict_spill_failure_keeps_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let config = StackConfig::new(dir.path())
            .with_bundle_size(2)
            .with_skip_on_error(false);
        let s: SpoolingStack<Item> = SpoolingStack::new(config).unwrap();

        s.push(item(0, false)).unwrap();
        s.push(item(1, true)).unwrap();
        let err = s.push(item(2, false)).unwrap_err();
        assert!(matches!(err, StackError::Serialization { .. }));

        assert_eq!(s.bundle_count().unwrap(), 0);
        assert!(!dir.path().join("stack.0").exists());
        assert_eq!(s.in_memory_len(), 3);
        assert_eq!(s.pop().unwrap(), item(2, false));
        assert_eq!(s.pop().unwrap(), item(1, true));
        assert_eq!(s.pop().unwrap(), item(0, false));
    }

    #[test]
    fn test_tolerant_spill_drops_only_failing_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = StackConfig::new(dir.path()).with_bundle_size(3);
        let s: SpoolingStack<Item> = SpoolingStack::new(config).unwrap();

        s.push(item(0, false)).unwrap();
        s.push(item(1, true)).unwrap();
        s.push(item(2, false)).unwrap();
        s.push(item(3, false)).unwrap();

        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        assert_eq!(s.in_memory_len(), 1);

        assert_eq!(s.pop().unwrap(), item(3, false));
        assert_eq!(s.pop().unwrap(), item(2, false));
        assert_eq!(s.pop().unwrap(), item(0, false));
        assert!(matches!(s.pop(), Err(StackError::EmptyStack)));
    }

    #[test]
    fn test_tolerant_spill_with_no_survivors_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let s: SpoolingStack<Item> = SpoolingStack::new(StackConfig::new(dir.path())).unwrap();
        s.push(item(0, false)).unwrap();
        s.push(item(1, true)).unwrap();
        s.push(item(2, true)).unwrap();

        s.flush(Some(1), false).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));

        s.flush(None, true).unwrap();
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
        assert_eq!(s.in_memory_len(), 0);

        assert_eq!(s.pop().unwrap(), item(0, false));
        assert!(matches!(s.pop(), Err(StackError::EmptyStack)));
    }

    #[test]
    fn test_empty_bundle_does_not_hide_older_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.0"), b"[1,2]").unwrap();
        fs::write(dir.path().join("stack.1"), b"[]").unwrap();
        let s = stack(dir.path(), 5);
        assert_eq!(s.pop().unwrap(), 2);
        assert!(!dir.path().join("stack.1").exists());
        assert_eq!(s.pop().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_bundle_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.0"), b"not json").unwrap();
        let s = stack(dir.path(), 5);
        assert!(matches!(s.pop(), Err(StackError::Serialization { .. })));
        assert!(dir.path().join("stack.0").exists());
        assert_eq!(s.bundle_range().unwrap(), Some((0, 0)));
    }

    #[test]
    fn test_reset_returns_to_unopened_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("spool");
        let s = stack(&root, 2);
        for i in 0..5 {
            s.push(i).unwrap();
        }
        s.reset().unwrap();
        assert!(!root.exists());
        assert_eq!(s.in_memory_len(), 0);
        assert!(s.is_empty().unwrap());
        assert!(root.exists());
    }

    #[test]
    fn test_reset_reports_surviving_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("f");
        fs::write(&root, b"not a directory").unwrap();
        let s = stack(&root, 2);
        match s.reset() {
            Err(StackError::ResetIncomplete(path)) => assert_eq!(path, root),
            other => panic!("Expected ResetIncomplete, got {:?}", other),
        }
        assert!(root.is_file());
        assert_eq!(s.in_memory_len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_bundle_name_is_corrupt() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.0"), b"[1]").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"stack.\xff")), b"[2]").unwrap();
        let s = stack(dir.path(), 5);
        assert!(matches!(s.pop(), Err(StackError::CorruptIndex { .. })));
    }

    #[test]
    fn test_custom_codec() {
        struct Upper;

        impl Codec for Upper {
            fn name(&self) -> &'static str {
                "upper"
            }

            fn encode<V: Serialize>(&self, values: &[V]) -> std::result::Result<Vec<u8>, crate::CodecError> {
                Ok(serde_json::to_string(values)?.to_uppercase().into_bytes())
            }

            fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> std::result::Result<Vec<V>, crate::CodecError> {
                Ok(serde_json::from_slice(&bytes.to_ascii_lowercase())?)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = StackConfig::new(dir.path()).with_bundle_size(1);
        let s: SpoolingStack<String, Upper> = SpoolingStack::with_codec(config, Upper).unwrap();
        s.push("abc".to_string()).unwrap();
        s.push("def".to_string()).unwrap();
        assert_eq!(fs::read(dir.path().join("stack.0")).unwrap(), b"[\"ABC\"]");
        assert_eq!(s.pop().unwrap(), "def");
        assert_eq!(s.pop().unwrap(), "abc");
    }

    #[test]
    fn test_stack_is_send_and_sync() {
        fn assert_send_sync<S: Send + Sync>() {}
        assert_send_sync::<SpoolingStack<String>>();
    }
}
