//! LMDB-backed quad storage.
//!
//! Two memory-mapped environments live under the store directory: `main`
//! holds the preservation-worthy data (serialized terms, triple→context
//! associations, empty-context markers and namespace prefixes) while
//! `index` holds everything that can be reconstructed from it (term
//! hashes, the three lookup indices, the context→triple association and
//! the reverse namespace map). Splitting them keeps the index rebuildable
//! without ever touching the primary data file.

mod error;
mod key_sequence;
pub mod term_codec;

pub use self::error::{CorruptionError, StorageError};
use self::key_sequence::KeySequence;
use heed::types::Bytes;
use heed::{
    Database, DatabaseFlags, DatabaseOpenOptions, Env, EnvFlags, EnvOpenOptions, RoTxn, RwTxn,
    WithoutTls,
};
use oxrdf::{GraphName, GraphNameRef, NamedNodeRef, SubjectRef, TermRef, Triple, TripleRef};
use std::fs::create_dir_all;
use std::path::Path;
use tracing::{debug, info};

/// Length in bytes of a single term key.
const KEY_LENGTH: usize = 5;
/// First byte value used in term keys. `\x00` is reserved as a separator,
/// `\x01` is spare.
const KEY_START: u8 = 2;
const TRIPLE_KEY_LENGTH: usize = 3 * KEY_LENGTH;
const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024 * 1024; // 1 TiB

const TERM2STR_DB: &str = "t:st";
const SPO2C_DB: &str = "spo:c";
const CTX_DB: &str = "c:";
const PFX2NS_DB: &str = "pfx:ns";
const HASH2TERM_DB: &str = "th:t";
const NS2PFX_DB: &str = "ns:pfx";
const S2PO_DB: &str = "s:po";
const P2SO_DB: &str = "p:so";
const O2SP_DB: &str = "o:sp";
const C2SPO_DB: &str = "c:spo";

const S_POS: usize = 0;
const P_POS: usize = 1;
const O_POS: usize = 2;

type TermKey = [u8; KEY_LENGTH];
type TripleKey = [u8; TRIPLE_KEY_LENGTH];

/// Options for opening a [`QuadStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Maximum size either environment may grow to.
    pub map_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

/// A context-aware RDF quad store over two LMDB environments.
///
/// Terms are interned once and addressed by dense fixed-length keys; six
/// indices make every (s, p, o, c) binding combination answerable without
/// a scan. A single writer and any number of readers may be active at the
/// same time; readers observe the snapshot taken when they started.
///
/// Usage example:
/// ```
/// use oxldp::model::*;
/// use oxldp::storage::QuadStore;
///
/// let dir = tempfile::tempdir()?;
/// let store = QuadStore::open(dir.path())?;
///
/// let ex = NamedNodeRef::new("http://example.com")?;
/// let mut txn = store.write_txn()?;
/// txn.add(TripleRef::new(ex, ex, ex), None)?;
/// txn.commit()?;
///
/// let txn = store.read_txn()?;
/// let results: Result<Vec<_>, _> = txn.triples(None, None, None, None)?.collect();
/// assert_eq!(results?.len(), 1);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone)]
pub struct QuadStore {
    data_env: Env<WithoutTls>,
    index_env: Env<WithoutTls>,
    term2str: Database<Bytes, Bytes>,
    spo2c: Database<Bytes, Bytes>,
    ctx: Database<Bytes, Bytes>,
    pfx2ns: Database<Bytes, Bytes>,
    hash2term: Database<Bytes, Bytes>,
    ns2pfx: Database<Bytes, Bytes>,
    s2po: Database<Bytes, Bytes>,
    p2so: Database<Bytes, Bytes>,
    o2sp: Database<Bytes, Bytes>,
    c2spo: Database<Bytes, Bytes>,
    key_seq: KeySequence,
}

impl QuadStore {
    /// Opens a store under `path`, creating it if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Opens a store with explicit [`StoreOptions`].
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StorageError> {
        let path = path.as_ref();
        create_dir_all(path)?;
        let data_env = Self::open_env(&path.join("main"), 4, options.map_size)?;
        let index_env = Self::open_env(&path.join("index"), 6, options.map_size)?;

        let mut data_txn = data_env.write_txn()?;
        let term2str = Self::plain_db(&data_env, &mut data_txn, TERM2STR_DB)?;
        let spo2c = Self::dup_db(&data_env, &mut data_txn, SPO2C_DB)?;
        let ctx = Self::plain_db(&data_env, &mut data_txn, CTX_DB)?;
        let pfx2ns = Self::plain_db(&data_env, &mut data_txn, PFX2NS_DB)?;
        data_txn.commit()?;

        let mut index_txn = index_env.write_txn()?;
        let hash2term = Self::plain_db(&index_env, &mut index_txn, HASH2TERM_DB)?;
        let ns2pfx = Self::plain_db(&index_env, &mut index_txn, NS2PFX_DB)?;
        let s2po = Self::dup_db(&index_env, &mut index_txn, S2PO_DB)?;
        let p2so = Self::dup_db(&index_env, &mut index_txn, P2SO_DB)?;
        let o2sp = Self::dup_db(&index_env, &mut index_txn, O2SP_DB)?;
        let c2spo = Self::dup_db(&index_env, &mut index_txn, C2SPO_DB)?;
        index_txn.commit()?;

        debug!("opened quad store at {}", path.display());
        Ok(Self {
            data_env,
            index_env,
            term2str,
            spo2c,
            ctx,
            pfx2ns,
            hash2term,
            ns2pfx,
            s2po,
            p2so,
            o2sp,
            c2spo,
            key_seq: KeySequence::new(KEY_START, KEY_LENGTH),
        })
    }

    fn open_env(file: &Path, max_dbs: u32, map_size: usize) -> Result<Env<WithoutTls>, StorageError> {
        let mut options = EnvOpenOptions::new().read_txn_without_tls();
        options.max_dbs(max_dbs).map_size(map_size);
        // Each environment is a single file next to its lock file, matching
        // the `main`/`index` on-disk layout.
        unsafe {
            options.flags(EnvFlags::NO_SUB_DIR);
        }
        Ok(unsafe { options.open(file) }?)
    }

    fn plain_db(
        env: &Env<WithoutTls>,
        txn: &mut RwTxn<'_>,
        name: &str,
    ) -> Result<Database<Bytes, Bytes>, StorageError> {
        let mut options = DatabaseOpenOptions::new(env).types::<Bytes, Bytes>();
        options.name(name);
        Ok(options.create(txn)?)
    }

    fn dup_db(
        env: &Env<WithoutTls>,
        txn: &mut RwTxn<'_>,
        name: &str,
    ) -> Result<Database<Bytes, Bytes>, StorageError> {
        let mut options = DatabaseOpenOptions::new(env).types::<Bytes, Bytes>();
        options.name(name);
        options.flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED);
        Ok(options.create(txn)?)
    }

    /// Begins a read-only transaction over both environments.
    pub fn read_txn(&self) -> Result<StoreReadTxn<'_>, StorageError> {
        Ok(StoreReadTxn {
            data: self.data_env.read_txn()?,
            index: self.index_env.read_txn()?,
            store: self,
        })
    }

    /// Begins the read-write transaction. Only one may be active at a time;
    /// this call blocks until the current writer finishes.
    pub fn write_txn(&self) -> Result<StoreWriteTxn<'_>, StorageError> {
        debug!("beginning a read/write transaction");
        Ok(StoreWriteTxn {
            data: self.data_env.write_txn()?,
            index: self.index_env.write_txn()?,
            store: self,
        })
    }

    /// Runs `f` inside a read-only transaction.
    pub fn read<T, E: From<StorageError>>(
        &self,
        f: impl FnOnce(&StoreReadTxn<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let txn = self.read_txn()?;
        f(&txn)
    }

    /// Runs `f` inside the write transaction, committing on success and
    /// rolling back if `f` returns an error.
    pub fn write<T, E: From<StorageError>>(
        &self,
        f: impl FnOnce(&mut StoreWriteTxn<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut txn = self.write_txn()?;
        let result = f(&mut txn)?;
        txn.commit()?;
        Ok(result)
    }

    /// Binds a prefix to a namespace in an ad-hoc write transaction.
    pub fn bind(&self, prefix: &str, namespace: &str) -> Result<(), StorageError> {
        let mut txn = self.write_txn()?;
        txn.bind(prefix, namespace)?;
        txn.commit()
    }

    /// Reconstructs the whole index environment from the data environment.
    ///
    /// This is the recovery path after a crash between the two environment
    /// commits, or whenever index corruption is detected.
    pub fn rebuild_index(&self) -> Result<(), StorageError> {
        info!("rebuilding index environment from primary data");
        let data = self.data_env.read_txn()?;
        let mut index = self.index_env.write_txn()?;
        self.hash2term.clear(&mut index)?;
        self.ns2pfx.clear(&mut index)?;
        self.s2po.clear(&mut index)?;
        self.p2so.clear(&mut index)?;
        self.o2sp.clear(&mut index)?;
        self.c2spo.clear(&mut index)?;

        for entry in self.term2str.iter(&data)? {
            let (key, serialized) = entry?;
            self.hash2term
                .put(&mut index, &term_codec::term_hash(serialized), key)?;
        }
        for entry in self.spo2c.iter(&data)? {
            let (triple, context) = entry?;
            let triple = as_triple_key(triple)?;
            let (s, p, o) = split_triple_key(&triple);
            self.c2spo.put(&mut index, context, &triple)?;
            self.s2po.put(&mut index, &s, &pair_key(&p, &o))?;
            self.p2so.put(&mut index, &p, &pair_key(&s, &o))?;
            self.o2sp.put(&mut index, &o, &pair_key(&s, &p))?;
        }
        for entry in self.pfx2ns.iter(&data)? {
            let (prefix, namespace) = entry?;
            self.ns2pfx.put(&mut index, namespace, prefix)?;
        }
        index.commit()?;
        Ok(())
    }

    fn term_key(
        &self,
        index: &RoTxn<'_, WithoutTls>,
        serialized: &[u8],
    ) -> Result<Option<TermKey>, StorageError> {
        Ok(
            match self
                .hash2term
                .get(index, &term_codec::term_hash(serialized))?
            {
                Some(bytes) => Some(as_term_key(bytes)?),
                None => None,
            },
        )
    }

    fn intern(
        &self,
        data: &mut RwTxn<'_>,
        index: &mut RwTxn<'_>,
        serialized: &[u8],
    ) -> Result<TermKey, StorageError> {
        let hash = term_codec::term_hash(serialized);
        if let Some(bytes) = self.hash2term.get(index, &hash)? {
            return as_term_key(bytes);
        }
        let last = self.term2str.last(data)?.map(|(key, _)| key.to_vec());
        let key = self.key_seq.next(last.as_deref())?;
        self.term2str.put(data, &key, serialized)?;
        self.hash2term.put(index, &hash, &key)?;
        as_term_key(&key)
    }

    fn term_bytes<'t>(
        &self,
        data: &'t RoTxn<'_, WithoutTls>,
        key: &[u8],
    ) -> Result<&'t [u8], StorageError> {
        self.term2str
            .get(data, key)?
            .ok_or_else(|| CorruptionError::msg("dangling term key in an index").into())
    }

    fn resolve_triple(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        key: &TripleKey,
    ) -> Result<Triple, StorageError> {
        let subject = term_codec::decode_subject(self.term_bytes(data, &key[..KEY_LENGTH])?)?;
        let predicate =
            term_codec::decode_predicate(self.term_bytes(data, &key[KEY_LENGTH..2 * KEY_LENGTH])?)?;
        let object = term_codec::decode_term(self.term_bytes(data, &key[2 * KEY_LENGTH..])?)?;
        Ok(Triple::new(subject, predicate, object))
    }

    fn resolve_graph_name(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        key: &[u8],
    ) -> Result<GraphName, StorageError> {
        Ok(term_codec::decode_graph_name(self.term_bytes(data, key)?)?)
    }

    /// Returns the triple keys matching a pattern, optionally scoped to a
    /// context. Unscoped lookups see the union of all contexts.
    fn matching_keys(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        index: &RoTxn<'_, WithoutTls>,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<Vec<TripleKey>, StorageError> {
        // If any bound term was never interned there is nothing to find.
        let subject_key = match subject {
            Some(term) => match self.term_key(index, &term_codec::encode_subject(term)?)? {
                Some(key) => Some(key),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let predicate_key = match predicate {
            Some(term) => match self.term_key(index, &term_codec::encode_term(term.into())?)? {
                Some(key) => Some(key),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let object_key = match object {
            Some(term) => match self.term_key(index, &term_codec::encode_term(term)?)? {
                Some(key) => Some(key),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        if let Some(context) = context {
            let context_key =
                match self.term_key(index, &term_codec::encode_graph_name(context)?)? {
                    Some(key) => key,
                    None => return Ok(Vec::new()),
                };
            return match (subject_key, predicate_key, object_key) {
                (Some(s), Some(p), Some(o)) => {
                    let key = join_triple_key(&s, &p, &o);
                    Ok(if self.triple_in_context(data, &key, &context_key)? {
                        vec![key]
                    } else {
                        Vec::new()
                    })
                }
                (None, None, None) => self.keys_in_context(index, &context_key),
                _ => {
                    let mut keys = Vec::new();
                    for key in self.lookup(data, index, subject_key, predicate_key, object_key)? {
                        if self.triple_in_context(data, &key, &context_key)? {
                            keys.push(key);
                        }
                    }
                    Ok(keys)
                }
            };
        }
        self.lookup(data, index, subject_key, predicate_key, object_key)
    }

    fn lookup(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        index: &RoTxn<'_, WithoutTls>,
        subject: Option<TermKey>,
        predicate: Option<TermKey>,
        object: Option<TermKey>,
    ) -> Result<Vec<TripleKey>, StorageError> {
        match (subject, predicate, object) {
            (Some(s), Some(p), Some(o)) => {
                let key = join_triple_key(&s, &p, &o);
                Ok(if self.spo2c.get(data, &key)?.is_some() {
                    vec![key]
                } else {
                    Vec::new()
                })
            }
            // Two-bound lookups pick the primary index by the static
            // selectivity ranking (s, o, p); the remaining bound term
            // filters each duplicate.
            (Some(s), Some(p), None) => self.lookup_two_bound(index, (s, S_POS), (p, P_POS)),
            (Some(s), None, Some(o)) => self.lookup_two_bound(index, (s, S_POS), (o, O_POS)),
            (None, Some(p), Some(o)) => self.lookup_two_bound(index, (o, O_POS), (p, P_POS)),
            (Some(s), None, None) => self.lookup_one_bound(index, s, S_POS),
            (None, Some(p), None) => self.lookup_one_bound(index, p, P_POS),
            (None, None, Some(o)) => self.lookup_one_bound(index, o, O_POS),
            (None, None, None) => self.all_keys(data),
        }
    }

    fn lookup_db(&self, position: usize) -> Database<Bytes, Bytes> {
        match position {
            S_POS => self.s2po,
            P_POS => self.p2so,
            _ => self.o2sp,
        }
    }

    fn lookup_one_bound(
        &self,
        index: &RoTxn<'_, WithoutTls>,
        key: TermKey,
        position: usize,
    ) -> Result<Vec<TripleKey>, StorageError> {
        let mut keys = Vec::new();
        for entry in self.lookup_db(position).prefix_iter(index, key.as_slice())? {
            let (_, value) = entry?;
            keys.push(compose_triple_key(position, &key, value)?);
        }
        Ok(keys)
    }

    fn lookup_two_bound(
        &self,
        index: &RoTxn<'_, WithoutTls>,
        primary: (TermKey, usize),
        filter: (TermKey, usize),
    ) -> Result<Vec<TripleKey>, StorageError> {
        let (primary_key, primary_pos) = primary;
        let (filter_key, filter_pos) = filter;
        let value_positions = lookup_value_positions(primary_pos);
        let filter_slot = usize::from(value_positions[0] != filter_pos);
        let mut keys = Vec::new();
        for entry in self
            .lookup_db(primary_pos)
            .prefix_iter(index, primary_key.as_slice())?
        {
            let (_, value) = entry?;
            if value.len() != 2 * KEY_LENGTH {
                return Err(
                    CorruptionError::msg("lookup index value of unexpected length").into(),
                );
            }
            if value[filter_slot * KEY_LENGTH..(filter_slot + 1) * KEY_LENGTH] == filter_key {
                keys.push(compose_triple_key(primary_pos, &primary_key, value)?);
            }
        }
        Ok(keys)
    }

    fn all_keys(&self, data: &RoTxn<'_, WithoutTls>) -> Result<Vec<TripleKey>, StorageError> {
        let mut keys = Vec::new();
        for entry in self.spo2c.iter(data)?.move_between_keys() {
            let (key, _) = entry?;
            keys.push(as_triple_key(key)?);
        }
        Ok(keys)
    }

    fn keys_in_context(
        &self,
        index: &RoTxn<'_, WithoutTls>,
        context: &TermKey,
    ) -> Result<Vec<TripleKey>, StorageError> {
        let mut keys = Vec::new();
        for entry in self.c2spo.prefix_iter(index, context.as_slice())? {
            let (_, value) = entry?;
            keys.push(as_triple_key(value)?);
        }
        Ok(keys)
    }

    fn triple_in_context(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        triple: &TripleKey,
        context: &TermKey,
    ) -> Result<bool, StorageError> {
        for entry in self.spo2c.prefix_iter(data, triple.as_slice())? {
            let (_, value) = entry?;
            if value == context {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn contexts_of(
        &self,
        data: &RoTxn<'_, WithoutTls>,
        triple: &TripleKey,
    ) -> Result<Vec<TermKey>, StorageError> {
        let mut contexts = Vec::new();
        for entry in self.spo2c.prefix_iter(data, triple.as_slice())? {
            let (_, value) = entry?;
            contexts.push(as_term_key(value)?);
        }
        Ok(contexts)
    }
}

/// Lazily decoded triples matching a pattern.
///
/// Matching keys are buffered when the iterator is created; terms are
/// resolved against the data environment while iterating, so the iterator
/// borrows its transaction and cannot outlive it.
#[must_use]
pub struct TripleIter<'a> {
    keys: std::vec::IntoIter<TripleKey>,
    data: &'a RoTxn<'a, WithoutTls>,
    store: &'a QuadStore,
}

impl Iterator for TripleIter<'_> {
    type Item = Result<Triple, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        Some(self.store.resolve_triple(self.data, &key))
    }
}

/// A read-only transaction over both environments.
#[must_use]
pub struct StoreReadTxn<'a> {
    data: RoTxn<'a, WithoutTls>,
    index: RoTxn<'a, WithoutTls>,
    store: &'a QuadStore,
}

impl StoreReadTxn<'_> {
    /// Iterates over the triples matching a pattern, optionally scoped to
    /// a context. An unscoped lookup sees the union of all contexts.
    pub fn triples(
        &self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<TripleIter<'_>, StorageError> {
        let keys = self
            .store
            .matching_keys(&self.data, &self.index, subject, predicate, object, context)?;
        Ok(TripleIter {
            keys: keys.into_iter(),
            data: &self.data,
            store: self.store,
        })
    }

    /// Checks whether a triple is present, optionally in a given context.
    pub fn contains(
        &self,
        triple: TripleRef<'_>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<bool, StorageError> {
        Ok(!self
            .store
            .matching_keys(
                &self.data,
                &self.index,
                Some(triple.subject),
                Some(triple.predicate),
                Some(triple.object),
                context,
            )?
            .is_empty())
    }

    /// Number of stored (triple, context) associations, or of triples in
    /// one context.
    pub fn len(&self, context: Option<GraphNameRef<'_>>) -> Result<usize, StorageError> {
        read_len(self.store, &self.data, &self.index, context)
    }

    /// The graph names the store knows about, or those a triple appears in.
    pub fn contexts(&self, triple: Option<TripleRef<'_>>) -> Result<Vec<GraphName>, StorageError> {
        read_contexts(self.store, &self.data, &self.index, triple)
    }

    /// The namespace bound to a prefix.
    pub fn namespace(&self, prefix: &str) -> Result<Option<String>, StorageError> {
        read_namespace(self.store, &self.data, prefix)
    }

    /// The prefix bound to a namespace.
    pub fn prefix(&self, namespace: &str) -> Result<Option<String>, StorageError> {
        read_prefix(self.store, &self.index, namespace)
    }

    /// All (prefix, namespace) bindings.
    pub fn namespaces(&self) -> Result<Vec<(String, String)>, StorageError> {
        read_namespaces(self.store, &self.data)
    }
}

/// The read-write transaction over both environments.
///
/// Dropping the transaction without committing rolls both halves back.
#[must_use]
pub struct StoreWriteTxn<'a> {
    data: RwTxn<'a>,
    index: RwTxn<'a>,
    store: &'a QuadStore,
}

impl StoreWriteTxn<'_> {
    /// Adds a triple to a context (the default graph if `None`).
    ///
    /// Returns `false` if the quad was already present; adding an existing
    /// quad is a no-op.
    pub fn add(
        &mut self,
        triple: TripleRef<'_>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<bool, StorageError> {
        let context = context.unwrap_or(GraphNameRef::DefaultGraph);
        let s = self.store.intern(
            &mut self.data,
            &mut self.index,
            &term_codec::encode_subject(triple.subject)?,
        )?;
        let p = self.store.intern(
            &mut self.data,
            &mut self.index,
            &term_codec::encode_term(triple.predicate.into())?,
        )?;
        let o = self.store.intern(
            &mut self.data,
            &mut self.index,
            &term_codec::encode_term(triple.object)?,
        )?;
        let c = self.store.intern(
            &mut self.data,
            &mut self.index,
            &term_codec::encode_graph_name(context)?,
        )?;

        // Track the context, including empty ones.
        if self.store.ctx.get(&self.data, &c)?.is_none() {
            self.store.ctx.put(&mut self.data, &c, &[])?;
        }

        let key = join_triple_key(&s, &p, &o);
        if self.store.triple_in_context(&self.data, &key, &c)? {
            return Ok(false);
        }
        self.store.spo2c.put(&mut self.data, &key, &c)?;
        self.store.c2spo.put(&mut self.index, &c, &key)?;
        // Lookup entries are per triple; duplicate puts on a DUP_SORT
        // database are no-ops, which keeps this idempotent across contexts.
        self.store.s2po.put(&mut self.index, &s, &pair_key(&p, &o))?;
        self.store.p2so.put(&mut self.index, &p, &pair_key(&s, &o))?;
        self.store.o2sp.put(&mut self.index, &o, &pair_key(&s, &p))?;
        Ok(true)
    }

    /// Removes the triples matching a pattern.
    ///
    /// With a context, only that context's associations are dropped; without
    /// one, every context association of each matching triple goes away.
    /// Returns the number of matched triples.
    pub fn remove(
        &mut self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<usize, StorageError> {
        let keys = self
            .store
            .matching_keys(&self.data, &self.index, subject, predicate, object, context)?;
        let context_key = match context {
            Some(context) => {
                self.store
                    .term_key(&self.index, &term_codec::encode_graph_name(context)?)?
            }
            None => None,
        };
        for key in &keys {
            if let Some(context_key) = context_key {
                self.store
                    .spo2c
                    .delete_one_duplicate(&mut self.data, key.as_slice(), &context_key)?;
                self.store
                    .c2spo
                    .delete_one_duplicate(&mut self.index, &context_key, key.as_slice())?;
            } else {
                let contexts = self.store.contexts_of(&self.data, key)?;
                for c in contexts {
                    self.store
                        .c2spo
                        .delete_one_duplicate(&mut self.index, &c, key.as_slice())?;
                }
                self.store.spo2c.delete(&mut self.data, key.as_slice())?;
            }
            // Drop the lookup entries once no context references the triple.
            if self.store.spo2c.get(&self.data, key.as_slice())?.is_none() {
                let (s, p, o) = split_triple_key(key);
                self.store
                    .s2po
                    .delete_one_duplicate(&mut self.index, &s, &pair_key(&p, &o))?;
                self.store
                    .p2so
                    .delete_one_duplicate(&mut self.index, &p, &pair_key(&s, &o))?;
                self.store
                    .o2sp
                    .delete_one_duplicate(&mut self.index, &o, &pair_key(&s, &p))?;
            }
        }
        Ok(keys.len())
    }

    /// Registers a possibly empty named graph.
    pub fn add_graph(&mut self, graph_name: GraphNameRef<'_>) -> Result<bool, StorageError> {
        let c = self.store.intern(
            &mut self.data,
            &mut self.index,
            &term_codec::encode_graph_name(graph_name)?,
        )?;
        if self.store.ctx.get(&self.data, &c)?.is_some() {
            return Ok(false);
        }
        self.store.ctx.put(&mut self.data, &c, &[])?;
        Ok(true)
    }

    /// Removes all triples in a graph and the graph itself.
    pub fn remove_graph(&mut self, graph_name: GraphNameRef<'_>) -> Result<(), StorageError> {
        self.remove(None, None, None, Some(graph_name))?;
        if let Some(c) = self
            .store
            .term_key(&self.index, &term_codec::encode_graph_name(graph_name)?)?
        {
            self.store.ctx.delete(&mut self.data, &c)?;
        }
        Ok(())
    }

    /// Binds a prefix to a namespace, in both directions.
    pub fn bind(&mut self, prefix: &str, namespace: &str) -> Result<(), StorageError> {
        self.store
            .pfx2ns
            .put(&mut self.data, prefix.as_bytes(), namespace.as_bytes())?;
        self.store
            .ns2pfx
            .put(&mut self.index, namespace.as_bytes(), prefix.as_bytes())?;
        Ok(())
    }

    /// Commits the data environment first, then the index environment.
    ///
    /// If the index half fails, the data half is already durable and the
    /// indices can be reconstructed with [`QuadStore::rebuild_index`].
    pub fn commit(self) -> Result<(), StorageError> {
        debug!("committing transaction");
        self.data.commit()?;
        self.index.commit()?;
        Ok(())
    }

    /// Abandons all the operations of the transaction.
    pub fn abort(self) {
        debug!("rolling back transaction");
        self.data.abort();
        self.index.abort();
    }

    /// Iterates over the triples matching a pattern, seeing the
    /// transaction's own uncommitted writes.
    pub fn triples(
        &self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<TripleIter<'_>, StorageError> {
        let keys = self
            .store
            .matching_keys(&self.data, &self.index, subject, predicate, object, context)?;
        Ok(TripleIter {
            keys: keys.into_iter(),
            data: &self.data,
            store: self.store,
        })
    }

    /// Checks whether a triple is present, optionally in a given context.
    pub fn contains(
        &self,
        triple: TripleRef<'_>,
        context: Option<GraphNameRef<'_>>,
    ) -> Result<bool, StorageError> {
        Ok(!self
            .store
            .matching_keys(
                &self.data,
                &self.index,
                Some(triple.subject),
                Some(triple.predicate),
                Some(triple.object),
                context,
            )?
            .is_empty())
    }

    /// Number of stored (triple, context) associations, or of triples in
    /// one context.
    pub fn len(&self, context: Option<GraphNameRef<'_>>) -> Result<usize, StorageError> {
        read_len(self.store, &self.data, &self.index, context)
    }

    /// The graph names the store knows about, or those a triple appears in.
    pub fn contexts(&self, triple: Option<TripleRef<'_>>) -> Result<Vec<GraphName>, StorageError> {
        read_contexts(self.store, &self.data, &self.index, triple)
    }

    /// The namespace bound to a prefix.
    pub fn namespace(&self, prefix: &str) -> Result<Option<String>, StorageError> {
        read_namespace(self.store, &self.data, prefix)
    }

    /// The prefix bound to a namespace.
    pub fn prefix(&self, namespace: &str) -> Result<Option<String>, StorageError> {
        read_prefix(self.store, &self.index, namespace)
    }

    /// All (prefix, namespace) bindings.
    pub fn namespaces(&self) -> Result<Vec<(String, String)>, StorageError> {
        read_namespaces(self.store, &self.data)
    }
}

fn read_len(
    store: &QuadStore,
    data: &RoTxn<'_, WithoutTls>,
    index: &RoTxn<'_, WithoutTls>,
    context: Option<GraphNameRef<'_>>,
) -> Result<usize, StorageError> {
    match context {
        Some(context) => {
            let Some(c) = store.term_key(index, &term_codec::encode_graph_name(context)?)? else {
                return Ok(0);
            };
            Ok(store.keys_in_context(index, &c)?.len())
        }
        None => Ok(usize::try_from(store.spo2c.len(data)?)
            .map_err(|_| CorruptionError::msg("store length overflows usize"))?),
    }
}

fn read_contexts(
    store: &QuadStore,
    data: &RoTxn<'_, WithoutTls>,
    index: &RoTxn<'_, WithoutTls>,
    triple: Option<TripleRef<'_>>,
) -> Result<Vec<GraphName>, StorageError> {
    let mut contexts = Vec::new();
    if let Some(triple) = triple {
        let keys = store.matching_keys(
            data,
            index,
            Some(triple.subject),
            Some(triple.predicate),
            Some(triple.object),
            None,
        )?;
        let Some(key) = keys.first() else {
            return Ok(contexts);
        };
        for c in store.contexts_of(data, key)? {
            contexts.push(store.resolve_graph_name(data, &c)?);
        }
    } else {
        for entry in store.ctx.iter(data)? {
            let (key, _) = entry?;
            contexts.push(store.resolve_graph_name(data, key)?);
        }
    }
    Ok(contexts)
}

fn read_namespace(
    store: &QuadStore,
    data: &RoTxn<'_, WithoutTls>,
    prefix: &str,
) -> Result<Option<String>, StorageError> {
    Ok(match store.pfx2ns.get(data, prefix.as_bytes())? {
        Some(bytes) => Some(bytes_to_string(bytes)?),
        None => None,
    })
}

fn read_prefix(
    store: &QuadStore,
    index: &RoTxn<'_, WithoutTls>,
    namespace: &str,
) -> Result<Option<String>, StorageError> {
    Ok(match store.ns2pfx.get(index, namespace.as_bytes())? {
        Some(bytes) => Some(bytes_to_string(bytes)?),
        None => None,
    })
}

fn read_namespaces(
    store: &QuadStore,
    data: &RoTxn<'_, WithoutTls>,
) -> Result<Vec<(String, String)>, StorageError> {
    let mut bindings = Vec::new();
    for entry in store.pfx2ns.iter(data)? {
        let (prefix, namespace) = entry?;
        bindings.push((bytes_to_string(prefix)?, bytes_to_string(namespace)?));
    }
    Ok(bindings)
}

fn bytes_to_string(bytes: &[u8]) -> Result<String, StorageError> {
    Ok(std::str::from_utf8(bytes)
        .map_err(|e| CorruptionError::msg(format!("invalid UTF-8 in namespace table: {e}")))?
        .to_owned())
}

fn as_term_key(bytes: &[u8]) -> Result<TermKey, StorageError> {
    bytes
        .try_into()
        .map_err(|_| CorruptionError::msg(format!("invalid term key length {}", bytes.len())).into())
}

fn as_triple_key(bytes: &[u8]) -> Result<TripleKey, StorageError> {
    bytes.try_into().map_err(|_| {
        CorruptionError::msg(format!("invalid triple key length {}", bytes.len())).into()
    })
}

fn join_triple_key(s: &TermKey, p: &TermKey, o: &TermKey) -> TripleKey {
    let mut key = [0; TRIPLE_KEY_LENGTH];
    key[..KEY_LENGTH].copy_from_slice(s);
    key[KEY_LENGTH..2 * KEY_LENGTH].copy_from_slice(p);
    key[2 * KEY_LENGTH..].copy_from_slice(o);
    key
}

fn split_triple_key(key: &TripleKey) -> (TermKey, TermKey, TermKey) {
    let mut s = [0; KEY_LENGTH];
    let mut p = [0; KEY_LENGTH];
    let mut o = [0; KEY_LENGTH];
    s.copy_from_slice(&key[..KEY_LENGTH]);
    p.copy_from_slice(&key[KEY_LENGTH..2 * KEY_LENGTH]);
    o.copy_from_slice(&key[2 * KEY_LENGTH..]);
    (s, p, o)
}

fn pair_key(a: &TermKey, b: &TermKey) -> [u8; 2 * KEY_LENGTH] {
    let mut key = [0; 2 * KEY_LENGTH];
    key[..KEY_LENGTH].copy_from_slice(a);
    key[KEY_LENGTH..].copy_from_slice(b);
    key
}

/// Positions of the two sub-keys stored in each lookup index value, by the
/// position of the index's own key.
fn lookup_value_positions(position: usize) -> [usize; 2] {
    match position {
        S_POS => [P_POS, O_POS],
        P_POS => [S_POS, O_POS],
        _ => [S_POS, P_POS],
    }
}

fn compose_triple_key(
    position: usize,
    key: &TermKey,
    value: &[u8],
) -> Result<TripleKey, StorageError> {
    if value.len() != 2 * KEY_LENGTH {
        return Err(CorruptionError::msg("lookup index value of unexpected length").into());
    }
    let positions = lookup_value_positions(position);
    let mut triple = [0; TRIPLE_KEY_LENGTH];
    triple[position * KEY_LENGTH..(position + 1) * KEY_LENGTH].copy_from_slice(key);
    triple[positions[0] * KEY_LENGTH..(positions[0] + 1) * KEY_LENGTH]
        .copy_from_slice(&value[..KEY_LENGTH]);
    triple[positions[1] * KEY_LENGTH..(positions[1] + 1) * KEY_LENGTH]
        .copy_from_slice(&value[KEY_LENGTH..]);
    Ok(triple)
}
