//! Content-addressed object storage for the ort merge engine.
//!
//! The engine only ever talks to the [`ObjectStore`] trait: reads of blob,
//! tree, and commit objects by id, and idempotent content-addressed writes
//! of the blobs and trees the merge produces. [`MemoryStore`] is the
//! reference backend; persistent backends (loose files, packs) implement the
//! same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use ort_hash::{HashAlgorithm, HashError, ObjectId};
use ort_object::{Object, ObjectError};

/// Errors produced by object store operations.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A content-addressed object store.
///
/// Writes are idempotent by content hash: writing the same object twice
/// returns the same id and stores one copy. A store is sequentially
/// consistent within a single merge invocation.
pub trait ObjectStore: Send + Sync {
    /// Read an object by id. `Ok(None)` means the id is unknown.
    fn read(&self, oid: &ObjectId) -> Result<Option<Object>, OdbError>;

    /// Write an object, returning its content hash.
    fn write(&self, obj: &Object) -> Result<ObjectId, OdbError>;

    /// Whether the store holds an object with this id.
    fn contains(&self, oid: &ObjectId) -> bool;

    /// The hash algorithm ids are computed with.
    fn hash_algo(&self) -> HashAlgorithm;
}

/// In-memory content-addressed store.
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Object>>,
    hash_algo: HashAlgorithm,
}

impl MemoryStore {
    /// Create an empty SHA-1 store.
    pub fn new() -> Self {
        Self::with_algo(HashAlgorithm::Sha1)
    }

    /// Create an empty store keyed by the given algorithm.
    pub fn with_algo(hash_algo: HashAlgorithm) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            hash_algo,
        }
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, oid: &ObjectId) -> Result<Option<Object>, OdbError> {
        Ok(self.objects.lock().unwrap().get(oid).cloned())
    }

    fn write(&self, obj: &Object) -> Result<ObjectId, OdbError> {
        let oid = obj.compute_oid(self.hash_algo)?;
        self.objects
            .lock()
            .unwrap()
            .entry(oid)
            .or_insert_with(|| obj.clone());
        Ok(oid)
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        self.objects.lock().unwrap().contains_key(oid)
    }

    fn hash_algo(&self) -> HashAlgorithm {
        self.hash_algo
    }
}
