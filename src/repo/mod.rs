//! The LDP resource layer.
//!
//! Maps resource-level operations (GET, POST, PUT, PATCH, DELETE and the
//! versioning verbs) onto quad mutations: server-managed triples,
//! containment discovery with pairtree materialization, direct and
//! indirect container inference, version snapshots and tombstones. All
//! resource metadata lives in the default graph, keyed by `info:fcres/`
//! URNs; public URIs only exist at the API boundary.

mod patch;

use crate::config::{RefIntegrity, RepoConfig};
use crate::event::{ChangeEvent, EventJournal, EventSink, EventType};
use crate::storage::{QuadStore, StorageError, StoreReadTxn, StoreWriteTxn};
use crate::toolbox::{Preference, Toolbox, format_rfc1123, parse_xsd_datetime, xsd_datetime};
use crate::vocab::{ebucore, fcrepo, fcsystem, ldp, premis};
use oxrdf::vocab::rdf;
use oxrdf::{
    Graph, Literal, NamedNode, NamedNodeRef, Subject, SubjectRef, Term, TermRef, Triple, TripleRef,
};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default agent recorded when no authenticated user is known.
pub const DEFAULT_ACTOR: &str = "BypassAdmin";

/// Path segment under which version snapshots of a resource live.
pub const VERSIONS_CONT_LABEL: &str = "fcr:versions";

/// Uid of the repository root.
pub const ROOT_UID: &str = "";

/// Media type accepted for PATCH requests.
pub const ACCEPT_PATCH: &str = "application/sparql-update";

/// RDF media types routed to the RDF source class; anything else is a
/// binary.
pub const ACCEPT_RDF: [&str; 6] = [
    "application/ld+json",
    "application/n-triples",
    "application/rdf+xml",
    "text/n3",
    "text/rdf+n3",
    "text/turtle",
];

fn base_types() -> [NamedNodeRef<'static>; 3] {
    [fcrepo::RESOURCE, ldp::RESOURCE, ldp::RDF_SOURCE]
}

fn srv_mgd_predicates() -> [NamedNodeRef<'static>; 12] {
    [
        fcrepo::CREATED,
        fcrepo::CREATED_BY,
        fcrepo::LAST_MODIFIED,
        fcrepo::LAST_MODIFIED_BY,
        fcrepo::HAS_PARENT,
        fcrepo::HAS_VERSION,
        fcrepo::HAS_VERSIONS,
        fcrepo::HAS_VERSION_LABEL,
        ldp::CONTAINS,
        premis::HAS_MESSAGE_DIGEST,
        fcsystem::CONTAINS,
        fcsystem::TOMBSTONE,
    ]
}

fn srv_mgd_types() -> [NamedNodeRef<'static>; 9] {
    [
        fcrepo::RESOURCE,
        fcrepo::BINARY,
        fcrepo::CONTAINER,
        fcrepo::PAIRTREE,
        fcrepo::VERSION,
        ldp::RESOURCE,
        ldp::RDF_SOURCE,
        ldp::NON_RDF_SOURCE,
        fcsystem::TOMBSTONE_CLASS,
    ]
}

/// Predicates a PATCH may never touch.
fn protected_predicates() -> [NamedNodeRef<'static>; 3] {
    [fcrepo::CREATED, fcrepo::CREATED_BY, ldp::CONTAINS]
}

/// A request-level error produced by the resource layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResourceError {
    /// The resource does not exist (404).
    #[error("resource /{0} does not exist")]
    NotFound(String),
    /// A tombstone sits where the resource used to be (410).
    #[error("resource /{uid} is gone")]
    Gone {
        uid: String,
        /// Tombstone creation time, when recorded.
        since: Option<String>,
    },
    /// Creation collided with an existing resource (409).
    #[error("resource /{0} already exists")]
    AlreadyExists(String),
    /// The resource or request is malformed (409).
    #[error("invalid resource /{uid}: {message}")]
    InvalidResource { uid: String, message: String },
    /// A server-managed term showed up in a payload under strict handling
    /// (412).
    #[error("some {position}s are server managed and cannot be modified: {terms}")]
    ServerManagedTerm {
        position: &'static str,
        terms: String,
    },
    /// A payload references a repository resource that does not exist
    /// (412).
    #[error("dangling reference to repository resource {0}")]
    RefIntViolation(String),
    /// A payload speaks about a subject other than the resource itself
    /// (422).
    #[error("{subject} is not in the topic of this RDF, which is {resource}")]
    SingleSubject { resource: String, subject: String },
    /// The SPARQL update uses a feature outside the supported subset.
    #[error("unsupported SPARQL update: {0}")]
    UnsupportedUpdate(String),
    /// The SPARQL update does not parse.
    #[error(transparent)]
    UpdateSyntax(#[from] spargebra::SparqlSyntaxError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Created,
    Updated,
    Deleted,
}

/// How server-managed terms in payloads are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handling {
    /// Payloads pass through unchecked.
    None,
    /// Offending triples are stripped and logged.
    #[default]
    Lenient,
    /// Offending triples reject the request.
    Strict,
}

impl Handling {
    /// Reads the `handling` preference of a parsed `Prefer` header.
    pub fn from_prefer(preferences: &HashMap<String, Preference>) -> Self {
        match preferences
            .get("handling")
            .and_then(|p| p.value.as_deref())
        {
            Some("strict") => Self::Strict,
            Some("lenient") => Self::Lenient,
            _ => Self::default(),
        }
    }
}

/// Which parts of a resource a representation includes.
#[derive(Debug, Clone, Copy)]
pub struct ReprOptions {
    /// Include triples pointing at this resource.
    pub incl_inbound: bool,
    /// Include `ldp:contains` edges.
    pub incl_children: bool,
    /// Include the full graphs of contained resources.
    pub embed_children: bool,
    /// Include server-managed triples.
    pub incl_srv_mgd: bool,
}

impl Default for ReprOptions {
    fn default() -> Self {
        Self {
            incl_inbound: false,
            incl_children: true,
            embed_children: false,
            incl_srv_mgd: true,
        }
    }
}

impl ReprOptions {
    /// Interprets the `return=representation` include/omit tokens of a
    /// parsed `Prefer` header.
    pub fn from_prefer(preferences: &HashMap<String, Preference>) -> Self {
        let mut options = Self::default();
        let Some(pref) = preferences.get("return") else {
            return options;
        };
        if pref.value.as_deref() != Some("representation") {
            return options;
        }
        for token in pref.parameter_tokens("include") {
            options.apply_token(token, true);
        }
        for token in pref.parameter_tokens("omit") {
            options.apply_token(token, false);
        }
        options
    }

    fn apply_token(&mut self, token: &str, value: bool) {
        if token == fcrepo::SERVER_MANAGED.as_str() {
            self.incl_srv_mgd = value;
        } else if token == fcrepo::CHILDREN.as_str() {
            self.incl_children = value;
        } else if token == fcrepo::EMBED_RESOURCES.as_str() {
            self.embed_children = value;
        } else if token == fcrepo::INBOUND_REFERENCES.as_str() {
            self.incl_inbound = value;
        }
    }
}

/// How a DELETE is carried out.
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Replace the resource with a resurrectable tombstone.
    pub leave_tombstone: bool,
    /// Recursively delete contained resources.
    pub delete_children: bool,
    /// Remove triples pointing at the deleted resource. Forced on under
    /// strict referential integrity.
    pub inbound: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            leave_tombstone: true,
            delete_children: true,
            inbound: true,
        }
    }
}

/// Request-scoped state threaded through every operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub now: OffsetDateTime,
    pub actor: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            now: OffsetDateTime::now_utc(),
            actor: actor.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_ACTOR)
    }
}

/// Header values derived from a resource's metadata.
#[derive(Debug, Clone)]
pub struct ResourceHead {
    /// Weak entity tag derived from the stored digest.
    pub etag: Option<String>,
    /// RFC 1123 rendition of `fcrepo:lastModified`.
    pub last_modified: Option<String>,
    /// LDP types to expose as `Link: <…>;rel="type"`.
    pub link_types: Vec<NamedNode>,
}

/// Description of a stored binary, as reported by the content handler.
#[derive(Debug, Clone)]
pub struct BinaryMeta {
    pub mimetype: String,
    pub filename: Option<String>,
    /// Hex SHA-1 of the content.
    pub digest: String,
    pub size: u64,
}

/// The interface the core uses to store binary content. Implementations
/// own file layout, streaming and deduplication.
pub trait ContentHandler: Send + Sync {
    /// Persists the stream and describes it.
    fn store(&self, uid: &str, data: &mut dyn Read) -> std::io::Result<BinaryMeta>;
    /// Where the content of a resource lives on the local filesystem.
    fn local_path(&self, uid: &str, digest: &str) -> PathBuf;
    /// Drops the stored content.
    fn delete(&self, uid: &str, digest: &str) -> std::io::Result<()>;
}

/// Kind of a stored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    RdfSource,
    Binary {
        mimetype: Option<String>,
        filename: Option<String>,
    },
}

/// Read operations shared by both transaction flavors.
trait StoreRead {
    fn match_triples(
        &self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
    ) -> Result<Vec<Triple>, StorageError>;
}

impl StoreRead for StoreReadTxn<'_> {
    fn match_triples(
        &self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
    ) -> Result<Vec<Triple>, StorageError> {
        self.triples(subject, predicate, object, None)?.collect()
    }
}

impl StoreRead for StoreWriteTxn<'_> {
    fn match_triples(
        &self,
        subject: Option<SubjectRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
    ) -> Result<Vec<Triple>, StorageError> {
        self.triples(subject, predicate, object, None)?.collect()
    }
}

/// An LDP repository over a [`QuadStore`].
pub struct Repository {
    store: QuadStore,
    tbox: Toolbox,
    config: RepoConfig,
    sink: Option<Box<dyn EventSink>>,
    content: Option<Box<dyn ContentHandler>>,
}

impl Repository {
    /// Opens (or creates) a repository under `path`, exposed at `webroot`.
    pub fn open(path: impl AsRef<Path>, webroot: impl Into<String>) -> Result<Self, StorageError> {
        Self::open_with(path, webroot, RepoConfig::default())
    }

    /// Opens a repository with explicit configuration.
    pub fn open_with(
        path: impl AsRef<Path>,
        webroot: impl Into<String>,
        config: RepoConfig,
    ) -> Result<Self, StorageError> {
        let repo = Self {
            store: QuadStore::open(path)?,
            tbox: Toolbox::new(webroot),
            config,
            sink: None,
            content: None,
        };
        repo.ensure_root()?;
        Ok(repo)
    }

    /// Attaches the sink committed change events are dispatched to.
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attaches the binary content handler.
    pub fn with_content_handler(mut self, content: Box<dyn ContentHandler>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn store(&self) -> &QuadStore {
        &self.store
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.tbox
    }

    /// Creates the root container on first use.
    fn ensure_root(&self) -> Result<(), StorageError> {
        let root = self.tbox.uid_to_urn(ROOT_UID);
        let mut txn = self.store.write_txn()?;
        if txn
            .triples(Some(root.as_ref().into()), None, None, None)?
            .next()
            .transpose()?
            .is_none()
        {
            info!("bootstrapping the root container");
            let now = xsd_datetime(OffsetDateTime::now_utc());
            let actor = Literal::new_simple_literal(DEFAULT_ACTOR);
            for t in base_types() {
                txn.add(TripleRef::new(&root, rdf::TYPE, t), None)?;
            }
            txn.add(TripleRef::new(&root, rdf::TYPE, ldp::CONTAINER), None)?;
            txn.add(TripleRef::new(&root, rdf::TYPE, ldp::BASIC_CONTAINER), None)?;
            txn.add(TripleRef::new(&root, rdf::TYPE, fcrepo::CONTAINER), None)?;
            txn.add(TripleRef::new(&root, fcrepo::CREATED, &now), None)?;
            txn.add(TripleRef::new(&root, fcrepo::CREATED_BY, &actor), None)?;
            txn.add(TripleRef::new(&root, fcrepo::LAST_MODIFIED, &now), None)?;
            txn.add(
                TripleRef::new(&root, fcrepo::LAST_MODIFIED_BY, &actor),
                None,
            )?;
        }
        txn.commit()
    }

    /// Runs a write operation in a transaction, flushing the event journal
    /// only after a successful commit.
    fn with_write<T>(
        &self,
        f: impl FnOnce(&mut StoreWriteTxn<'_>, &mut EventJournal) -> Result<T, ResourceError>,
    ) -> Result<T, ResourceError> {
        let mut journal = EventJournal::new();
        let mut txn = self.store.write_txn()?;
        let outcome = match f(&mut txn, &mut journal) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("rolling back transaction: {e}");
                txn.abort();
                return Err(e);
            }
        };
        txn.commit()?;
        if self.config.messaging {
            if let Some(sink) = &self.sink {
                journal.flush(sink.as_ref());
            }
        }
        Ok(outcome)
    }

    // ## READ OPERATIONS ##

    /// Returns the in-memory representation of a resource, globalized to
    /// public URIs and filtered by `options`.
    pub fn get(&self, uid: &str, options: &ReprOptions) -> Result<Graph, ResourceError> {
        let txn = self.store.read_txn()?;
        let imr = self.extract_imr(&txn, uid, options, true)?;
        Ok(self.tbox.globalize_graph(&imr))
    }

    /// Returns header material for a resource.
    pub fn head(&self, uid: &str) -> Result<ResourceHead, ResourceError> {
        let txn = self.store.read_txn()?;
        let urn = self.tbox.uid_to_urn(uid);
        let metadata = self.subject_graph(&txn, &urn)?;
        if metadata.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        self.guard_tombstone(uid, &metadata)?;

        let etag = metadata
            .object_for_subject_predicate(&urn, premis::HAS_MESSAGE_DIGEST)
            .and_then(|t| match t {
                TermRef::NamedNode(n) => {
                    n.as_str().rsplit(':').next().map(|d| format!("W/\"{d}\""))
                }
                _ => None,
            });
        let last_modified = metadata
            .object_for_subject_predicate(&urn, fcrepo::LAST_MODIFIED)
            .and_then(|t| match t {
                TermRef::Literal(l) => parse_xsd_datetime(l.value()),
                _ => None,
            })
            .map(format_rfc1123);
        let link_types = metadata
            .objects_for_subject_predicate(&urn, rdf::TYPE)
            .filter_map(|t| match t {
                TermRef::NamedNode(n) if n.as_str().starts_with("http://www.w3.org/ns/ldp#") => {
                    Some(n.into_owned())
                }
                _ => None,
            })
            .collect();
        Ok(ResourceHead {
            etag,
            last_modified,
            link_types,
        })
    }

    /// Whether a uid holds a live resource.
    pub fn exists(&self, uid: &str) -> Result<bool, ResourceError> {
        let txn = self.store.read_txn()?;
        let urn = self.tbox.uid_to_urn(uid);
        let graph = self.subject_graph(&txn, &urn)?;
        Ok(!graph.is_empty() && self.tombstone_since(&graph).is_none())
    }

    /// Whether a resource is an RDF source or a binary.
    pub fn kind(&self, uid: &str) -> Result<ResourceKind, ResourceError> {
        let txn = self.store.read_txn()?;
        let urn = self.tbox.uid_to_urn(uid);
        let metadata = self.subject_graph(&txn, &urn)?;
        if metadata.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        let is_binary = metadata.contains(TripleRef::new(&urn, rdf::TYPE, ldp::NON_RDF_SOURCE));
        if !is_binary {
            return Ok(ResourceKind::RdfSource);
        }
        let literal_of = |predicate: NamedNodeRef<'_>| {
            metadata
                .object_for_subject_predicate(&urn, predicate)
                .and_then(|t| match t {
                    TermRef::Literal(l) => Some(l.value().to_owned()),
                    _ => None,
                })
        };
        Ok(ResourceKind::Binary {
            mimetype: literal_of(ebucore::HAS_MIME_TYPE),
            filename: literal_of(ebucore::FILENAME),
        })
    }

    /// The `fcr:versions` view of a resource.
    pub fn get_version_info(&self, uid: &str) -> Result<Graph, ResourceError> {
        let txn = self.store.read_txn()?;
        let urn = self.tbox.uid_to_urn(uid);
        if self.subject_graph(&txn, &urn)?.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        let mut info = Graph::default();
        for version in self.version_subjects(&txn, uid)? {
            info.insert(TripleRef::new(&urn, fcrepo::HAS_VERSION, &version));
            for t in self.subject_graph(&txn, &version)?.iter() {
                if t.predicate == fcrepo::CREATED
                    || t.predicate == fcrepo::HAS_VERSION_LABEL
                    || t.predicate == rdf::TYPE
                {
                    info.insert(t);
                }
            }
        }
        Ok(self.tbox.globalize_graph(&info))
    }

    /// The graph of one version snapshot.
    pub fn get_version(&self, uid: &str, ver_uid: &str) -> Result<Graph, ResourceError> {
        let txn = self.store.read_txn()?;
        let ver_urn = self
            .tbox
            .uid_to_urn(&format!("{uid}/{VERSIONS_CONT_LABEL}/{ver_uid}"));
        let graph = self.subject_graph(&txn, &ver_urn)?;
        if graph.is_empty() {
            return Err(ResourceError::NotFound(format!(
                "{uid}/{VERSIONS_CONT_LABEL}/{ver_uid}"
            )));
        }
        Ok(self.tbox.globalize_graph(&graph))
    }

    // ## WRITE OPERATIONS ##

    /// Creates a new child of `parent_uid`. The slug is a naming hint; on
    /// collision a fresh UUID is used instead. Returns the new uid.
    pub fn post(
        &self,
        ctx: &RequestContext,
        parent_uid: &str,
        slug: Option<&str>,
        payload: &Graph,
    ) -> Result<String, ResourceError> {
        self.with_write(|txn, journal| {
            let parent_urn = self.tbox.uid_to_urn(parent_uid);
            let parent_graph = self.subject_graph(txn, &parent_urn)?;
            if parent_graph.is_empty() {
                return Err(ResourceError::NotFound(parent_uid.to_owned()));
            }
            self.guard_tombstone(parent_uid, &parent_graph)?;

            let mut uid = join_uid(parent_uid, slug.unwrap_or(&mint_uuid()));
            if !self.slot_is_free(txn, &uid)? {
                // The slug is only a hint.
                debug!("slug {uid} is taken, minting a new uid");
                uid = join_uid(parent_uid, &mint_uuid());
                if !self.slot_is_free(txn, &uid)? {
                    return Err(ResourceError::AlreadyExists(uid));
                }
            }

            let payload = reroot_graph(payload, &self.tbox.uid_to_urn(&uid));
            self.create_or_replace(txn, journal, ctx, &uid, &payload, Handling::default(), true)?;
            Ok(uid)
        })
    }

    /// Creates or replaces the resource at `uid`.
    pub fn put(
        &self,
        ctx: &RequestContext,
        uid: &str,
        payload: &Graph,
        handling: Handling,
    ) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, journal| {
            self.create_or_replace(txn, journal, ctx, uid, payload, handling, false)
        })
    }

    /// Applies a SPARQL update to the resource's graph, atomically.
    pub fn patch(
        &self,
        ctx: &RequestContext,
        uid: &str,
        update: &str,
        handling: Handling,
    ) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, journal| self.apply_patch(txn, journal, ctx, uid, update, handling))
    }

    /// Deletes a resource, by default leaving a resurrectable tombstone
    /// and burying contained resources with it.
    pub fn delete(
        &self,
        ctx: &RequestContext,
        uid: &str,
        options: DeleteOptions,
    ) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, journal| {
            let urn = self.tbox.uid_to_urn(uid);
            let graph = self.subject_graph(txn, &urn)?;
            if graph.is_empty() {
                return Err(ResourceError::NotFound(uid.to_owned()));
            }
            self.guard_tombstone(uid, &graph)?;

            let inbound =
                options.inbound || self.config.referential_integrity == RefIntegrity::Strict;
            let children = if options.delete_children {
                self.descendants(txn, uid)?
            } else {
                Vec::new()
            };

            if options.leave_tombstone {
                self.bury(txn, journal, ctx, uid, inbound, None)?;
                for child in children {
                    self.bury(txn, journal, ctx, &child, inbound, Some(&urn))?;
                }
            } else {
                self.purge_resource(txn, uid, inbound)?;
                for child in children {
                    self.purge_resource(txn, &child, inbound)?;
                }
            }
            Ok(OpOutcome::Deleted)
        })
    }

    /// Erases a resource, its tombstone and all its versions. Emits no
    /// event.
    pub fn purge(&self, uid: &str) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, _journal| {
            self.purge_resource(txn, uid, true)?;
            Ok(OpOutcome::Deleted)
        })
    }

    /// Snapshots the current state of a resource under
    /// `<uid>/fcr:versions/<label>`. Returns the public version URI.
    pub fn create_version(
        &self,
        ctx: &RequestContext,
        uid: &str,
        label: Option<&str>,
    ) -> Result<NamedNode, ResourceError> {
        self.with_write(|txn, journal| {
            let urn = self.tbox.uid_to_urn(uid);
            let graph = self.subject_graph(txn, &urn)?;
            if graph.is_empty() {
                return Err(ResourceError::NotFound(uid.to_owned()));
            }
            self.guard_tombstone(uid, &graph)?;
            let ver_urn = self.snapshot(txn, journal, ctx, uid, label, true)?;
            Ok(self.tbox.globalize_iri(ver_urn.as_str()))
        })
    }

    /// Rewrites the resource's graph from one of its version snapshots,
    /// optionally snapshotting the current state first.
    pub fn revert_to_version(
        &self,
        ctx: &RequestContext,
        uid: &str,
        ver_uid: &str,
        backup: bool,
    ) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, journal| {
            let ver_urn = self
                .tbox
                .uid_to_urn(&format!("{uid}/{VERSIONS_CONT_LABEL}/{ver_uid}"));
            let ver_graph = self.subject_graph(txn, &ver_urn)?;
            if ver_graph.is_empty() {
                return Err(ResourceError::NotFound(format!(
                    "{uid}/{VERSIONS_CONT_LABEL}/{ver_uid}"
                )));
            }
            if backup {
                self.snapshot(txn, journal, ctx, uid, None, false)?;
            }

            let urn = self.tbox.uid_to_urn(uid);
            let mgd_predicates = srv_mgd_predicates();
            let mgd_types = srv_mgd_types();
            let mut revert = Graph::default();
            for t in ver_graph.iter() {
                if mgd_predicates.contains(&t.predicate) {
                    continue;
                }
                if t.predicate == rdf::TYPE {
                    if let TermRef::NamedNode(o) = t.object {
                        if mgd_types.contains(&o) {
                            continue;
                        }
                    }
                }
                let triple = Triple::new(urn.clone(), t.predicate.into_owned(), t.object.into_owned());
                revert.insert(&triple);
            }
            self.create_or_replace(txn, journal, ctx, uid, &revert, Handling::None, false)
        })
    }

    /// Brings a tombstoned resource back to life from its most recent
    /// pre-death snapshot.
    pub fn resurrect(&self, ctx: &RequestContext, uid: &str) -> Result<OpOutcome, ResourceError> {
        self.with_write(|txn, journal| {
            let urn = self.tbox.uid_to_urn(uid);
            let tombstone = self.subject_graph(txn, &urn)?;
            if tombstone.is_empty() {
                return Err(ResourceError::NotFound(uid.to_owned()));
            }
            if self.tombstone_since(&tombstone).is_none() {
                return Err(ResourceError::InvalidResource {
                    uid: uid.to_owned(),
                    message: "the resource is not a tombstone".to_owned(),
                });
            }

            let Some(latest) = self.latest_version(txn, uid)? else {
                return Err(ResourceError::InvalidResource {
                    uid: uid.to_owned(),
                    message: "no snapshot to resurrect from".to_owned(),
                });
            };
            let ver_graph = self.subject_graph(txn, &latest)?;

            let mut revived = Graph::default();
            for t in ver_graph.iter() {
                if t.predicate == fcrepo::HAS_VERSION_LABEL {
                    continue;
                }
                if t.predicate == rdf::TYPE && t.object == fcrepo::VERSION.into() {
                    continue;
                }
                let triple = Triple::new(urn.clone(), t.predicate.into_owned(), t.object.into_owned());
                revived.insert(&triple);
            }
            revived.insert(TripleRef::new(&urn, rdf::TYPE, fcrepo::RESOURCE));
            if revived.contains(TripleRef::new(&urn, rdf::TYPE, ldp::NON_RDF_SOURCE)) {
                revived.insert(TripleRef::new(&urn, rdf::TYPE, fcrepo::BINARY));
            } else if revived.contains(TripleRef::new(&urn, rdf::TYPE, ldp::CONTAINER)) {
                revived.insert(TripleRef::new(&urn, rdf::TYPE, fcrepo::CONTAINER));
            }

            let removed: Vec<Triple> = tombstone.iter().map(TripleRef::into_owned).collect();
            let added: Vec<Triple> = revived.iter().map(TripleRef::into_owned).collect();
            self.modify_resource(txn, journal, ctx, &urn, EventType::Create, removed, added, true)?;
            self.set_containment(txn, journal, ctx, uid, &revived)?;
            Ok(OpOutcome::Created)
        })
    }

    /// Creates a binary child of `parent_uid`, storing the content through
    /// the configured [`ContentHandler`] and its description as metadata.
    pub fn post_binary(
        &self,
        ctx: &RequestContext,
        parent_uid: &str,
        slug: Option<&str>,
        data: &mut dyn Read,
        mimetype: &str,
        filename: Option<&str>,
    ) -> Result<String, ResourceError> {
        let Some(content) = &self.content else {
            return Err(ResourceError::InvalidResource {
                uid: parent_uid.to_owned(),
                message: "no content handler is configured".to_owned(),
            });
        };
        self.with_write(|txn, journal| {
            let parent_urn = self.tbox.uid_to_urn(parent_uid);
            let parent_graph = self.subject_graph(txn, &parent_urn)?;
            if parent_graph.is_empty() {
                return Err(ResourceError::NotFound(parent_uid.to_owned()));
            }
            self.guard_tombstone(parent_uid, &parent_graph)?;

            let mut uid = join_uid(parent_uid, slug.unwrap_or(&mint_uuid()));
            if !self.slot_is_free(txn, &uid)? {
                uid = join_uid(parent_uid, &mint_uuid());
            }

            let meta = content
                .store(&uid, data)
                .map_err(StorageError::from)?;
            let urn = self.tbox.uid_to_urn(&uid);
            let mut graph = Graph::default();
            graph.insert(TripleRef::new(&urn, rdf::TYPE, ldp::NON_RDF_SOURCE));
            graph.insert(TripleRef::new(&urn, rdf::TYPE, fcrepo::BINARY));
            // The declared Content-Type wins over the handler's guess.
            let mimetype = Literal::new_simple_literal(if mimetype.is_empty() {
                meta.mimetype.as_str()
            } else {
                mimetype
            });
            graph.insert(TripleRef::new(&urn, ebucore::HAS_MIME_TYPE, &mimetype));
            if let Some(filename) = meta.filename.as_deref().or(filename) {
                let filename = Literal::new_simple_literal(filename);
                graph.insert(TripleRef::new(&urn, ebucore::FILENAME, &filename));
            }
            let digest = NamedNode::new_unchecked(format!("urn:sha1:{}", meta.digest));
            graph.insert(TripleRef::new(&urn, premis::HAS_MESSAGE_DIGEST, &digest));

            self.create_or_replace(txn, journal, ctx, &uid, &graph, Handling::None, true)?;
            Ok(uid)
        })
    }

    // ## INTERNALS ##

    fn subject_graph<T: StoreRead>(
        &self,
        txn: &T,
        subject: &NamedNode,
    ) -> Result<Graph, ResourceError> {
        let mut graph = Graph::default();
        for t in txn.match_triples(Some(subject.as_ref().into()), None, None)? {
            graph.insert(&t);
        }
        Ok(graph)
    }

    fn is_stored<T: StoreRead>(&self, txn: &T, urn: &NamedNode) -> Result<bool, ResourceError> {
        Ok(!txn
            .match_triples(Some(urn.as_ref().into()), None, None)?
            .is_empty())
    }

    /// The tombstone creation time if the graph describes a tombstone.
    fn tombstone_since(&self, graph: &Graph) -> Option<Option<String>> {
        let mut tombstoned = false;
        let mut since = None;
        for t in graph.iter() {
            if t.predicate == rdf::TYPE && t.object == fcsystem::TOMBSTONE_CLASS.into() {
                tombstoned = true;
            }
            if t.predicate == fcsystem::TOMBSTONE {
                tombstoned = true;
            }
            if t.predicate == fcrepo::CREATED {
                if let TermRef::Literal(l) = t.object {
                    since = Some(l.value().to_owned());
                }
            }
        }
        tombstoned.then_some(since)
    }

    fn guard_tombstone(&self, uid: &str, graph: &Graph) -> Result<(), ResourceError> {
        if let Some(since) = self.tombstone_since(graph) {
            return Err(ResourceError::Gone {
                uid: uid.to_owned(),
                since,
            });
        }
        Ok(())
    }

    fn slot_is_free(&self, txn: &StoreWriteTxn<'_>, uid: &str) -> Result<bool, ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        Ok(!self.is_stored(txn, &urn)?)
    }

    fn extract_imr<T: StoreRead>(
        &self,
        txn: &T,
        uid: &str,
        options: &ReprOptions,
        strict: bool,
    ) -> Result<Graph, ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        let mut graph = self.subject_graph(txn, &urn)?;
        if graph.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        if strict {
            self.guard_tombstone(uid, &graph)?;
        }

        let children: Vec<NamedNode> = graph
            .objects_for_subject_predicate(&urn, ldp::CONTAINS)
            .filter_map(|t| match t {
                TermRef::NamedNode(n) => Some(n.into_owned()),
                _ => None,
            })
            .collect();

        if !options.incl_children {
            for child in &children {
                graph.remove(TripleRef::new(&urn, ldp::CONTAINS, child));
            }
        }
        if options.embed_children {
            for child in &children {
                for t in self.subject_graph(txn, child)?.iter() {
                    graph.insert(t);
                }
            }
        }
        if options.incl_inbound {
            for t in txn.match_triples(None, None, Some(urn.as_ref().into()))? {
                graph.insert(&t);
            }
        }
        if !options.incl_srv_mgd {
            let mgd_predicates = srv_mgd_predicates();
            let mgd_types = srv_mgd_types();
            let stripped: Vec<Triple> = graph
                .iter()
                .filter(|t| {
                    mgd_predicates.contains(&t.predicate)
                        || (t.predicate == rdf::TYPE
                            && matches!(t.object, TermRef::NamedNode(o) if mgd_types.contains(&o)))
                })
                .map(TripleRef::into_owned)
                .collect();
            for t in stripped {
                graph.remove(&t);
            }
        }
        // The digest reflects internal state and versions have their own
        // view; neither belongs in a representation.
        let hidden: Vec<Triple> = graph
            .iter()
            .filter(|t| {
                t.predicate == premis::HAS_MESSAGE_DIGEST || t.predicate == fcrepo::HAS_VERSION
            })
            .map(TripleRef::into_owned)
            .collect();
        for t in hidden {
            graph.remove(&t);
        }
        Ok(graph)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_or_replace(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        payload: &Graph,
        handling: Handling,
        create_only: bool,
    ) -> Result<OpOutcome, ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        let stored = self.subject_graph(txn, &urn)?;
        if !stored.is_empty() {
            self.guard_tombstone(uid, &stored)?;
            if create_only {
                return Err(ResourceError::AlreadyExists(uid.to_owned()));
            }
        }
        let create = stored.is_empty();

        let localized = self.tbox.localize_graph(payload);
        self.check_single_subject(&localized, &urn)?;
        let mut graph = self.check_mgd_terms(localized, handling)?;
        self.check_ref_int(txn, &mut graph, &urn)?;
        self.add_srv_mgd_triples(ctx, &urn, &stored, &mut graph, create)?;

        // Structural server-side triples survive a replace.
        for t in stored.iter() {
            if t.predicate == ldp::CONTAINS
                || t.predicate == fcsystem::CONTAINS
                || t.predicate == fcrepo::HAS_PARENT
                || t.predicate == fcrepo::HAS_VERSION
                || t.predicate == fcrepo::HAS_VERSIONS
            {
                graph.insert(t);
            }
        }

        let (removed, added) = dedup_deltas(&stored, &graph);
        let event_type = if create {
            EventType::Create
        } else {
            EventType::Update
        };
        self.modify_resource(txn, journal, ctx, &urn, event_type, removed, added, true)?;
        if uid != ROOT_UID {
            self.set_containment(txn, journal, ctx, uid, &graph)?;
        }

        Ok(if create {
            OpOutcome::Created
        } else {
            OpOutcome::Updated
        })
    }

    /// Payloads may only speak about the resource they are written to;
    /// blank-node subjects are allowed.
    fn check_single_subject(&self, graph: &Graph, urn: &NamedNode) -> Result<(), ResourceError> {
        for t in graph.iter() {
            if let SubjectRef::NamedNode(subject) = t.subject {
                if subject != urn.as_ref() {
                    return Err(ResourceError::SingleSubject {
                        resource: urn.as_str().to_owned(),
                        subject: subject.as_str().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Screens server-managed predicates and types out of a payload.
    fn check_mgd_terms(&self, graph: Graph, handling: Handling) -> Result<Graph, ResourceError> {
        if handling == Handling::None {
            return Ok(graph);
        }
        let mgd_predicates = srv_mgd_predicates();
        let mgd_types = srv_mgd_types();
        let mut offending_predicates = HashSet::new();
        let mut offending_types = HashSet::new();
        for t in graph.iter() {
            if mgd_predicates.contains(&t.predicate) {
                offending_predicates.insert(t.predicate.into_owned());
            } else if t.predicate == rdf::TYPE {
                if let TermRef::NamedNode(o) = t.object {
                    if mgd_types.contains(&o) {
                        offending_types.insert(o.into_owned());
                    }
                }
            }
        }
        if offending_predicates.is_empty() && offending_types.is_empty() {
            return Ok(graph);
        }
        if handling == Handling::Strict {
            if !offending_predicates.is_empty() {
                return Err(ResourceError::ServerManagedTerm {
                    position: "predicate",
                    terms: join_iris(offending_predicates),
                });
            }
            return Err(ResourceError::ServerManagedTerm {
                position: "RDF type",
                terms: join_iris(offending_types),
            });
        }
        let mut out = Graph::default();
        for t in graph.iter() {
            let offending = offending_predicates.iter().any(|p| t.predicate == p.as_ref())
                || (t.predicate == rdf::TYPE
                    && matches!(t.object, TermRef::NamedNode(o) if offending_types.iter().any(|ty| o == ty.as_ref())));
            if offending {
                info!("removing server-managed triple from payload: {t}");
            } else {
                let triple = t.into_owned();
                out.insert(&triple);
            }
        }
        Ok(out)
    }

    /// Every object IRI inside the repository must resolve to an existing
    /// resource; self-references are fine.
    fn check_ref_int(
        &self,
        txn: &StoreWriteTxn<'_>,
        graph: &mut Graph,
        urn: &NamedNode,
    ) -> Result<(), ResourceError> {
        if self.config.referential_integrity == RefIntegrity::None {
            return Ok(());
        }
        let mut dangling = Vec::new();
        for t in graph.iter() {
            if let TermRef::NamedNode(object) = t.object {
                if self.tbox.is_repo_iri(object.as_str())
                    && object != urn.as_ref()
                    && !self.is_stored(txn, &object.into_owned())?
                {
                    if self.config.referential_integrity == RefIntegrity::Strict {
                        return Err(ResourceError::RefIntViolation(object.as_str().to_owned()));
                    }
                    dangling.push(t.into_owned());
                }
            }
        }
        for t in dangling {
            info!("removing link to non-existent repository resource: {t}");
            graph.remove(&t);
        }
        Ok(())
    }

    /// Adds the server-managed triples every write carries.
    fn add_srv_mgd_triples(
        &self,
        ctx: &RequestContext,
        urn: &NamedNode,
        stored: &Graph,
        graph: &mut Graph,
        create: bool,
    ) -> Result<(), ResourceError> {
        for t in base_types() {
            graph.insert(TripleRef::new(urn, rdf::TYPE, t));
        }

        let checksum = self.tbox.rdf_checksum(graph);
        let digest = NamedNode::new_unchecked(format!("urn:sha1:{checksum}"));
        set_value(graph, urn, premis::HAS_MESSAGE_DIGEST, digest.into());

        let now = xsd_datetime(ctx.now);
        let actor = Literal::new_simple_literal(ctx.actor.as_str());
        if create {
            set_value(graph, urn, fcrepo::CREATED, now.clone().into());
            set_value(graph, urn, fcrepo::CREATED_BY, actor.clone().into());
        } else {
            let created = stored
                .object_for_subject_predicate(urn, fcrepo::CREATED)
                .map(TermRef::into_owned)
                .unwrap_or_else(|| now.clone().into());
            let created_by = stored
                .object_for_subject_predicate(urn, fcrepo::CREATED_BY)
                .map(TermRef::into_owned)
                .unwrap_or_else(|| actor.clone().into());
            set_value(graph, urn, fcrepo::CREATED, created);
            set_value(graph, urn, fcrepo::CREATED_BY, created_by);
        }
        set_value(graph, urn, fcrepo::LAST_MODIFIED, now.into());
        set_value(graph, urn, fcrepo::LAST_MODIFIED_BY, actor.into());
        Ok(())
    }

    /// Low-level change application. Any observable write goes through
    /// here so the journal sees it.
    #[allow(clippy::too_many_arguments)]
    fn modify_resource(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        urn: &NamedNode,
        event_type: EventType,
        removed: Vec<Triple>,
        added: Vec<Triple>,
        notify: bool,
    ) -> Result<(), ResourceError> {
        let metadata = self.subject_graph(txn, urn)?;
        let mut resource_types: Vec<NamedNode> = metadata
            .objects_for_subject_predicate(urn, rdf::TYPE)
            .filter_map(|t| match t {
                TermRef::NamedNode(n) => Some(n.into_owned()),
                _ => None,
            })
            .collect();
        if resource_types.is_empty() {
            resource_types = added
                .iter()
                .filter(|t| t.predicate == rdf::TYPE)
                .filter_map(|t| match &t.object {
                    Term::NamedNode(n) => Some(n.clone()),
                    _ => None,
                })
                .collect();
        }
        let actor = metadata
            .object_for_subject_predicate(urn, fcrepo::CREATED_BY)
            .and_then(|t| match t {
                TermRef::Literal(l) => Some(l.value().to_owned()),
                _ => None,
            });

        for t in &removed {
            txn.remove(
                Some(t.subject.as_ref()),
                Some(t.predicate.as_ref()),
                Some(t.object.as_ref()),
                None,
            )?;
        }
        for t in &added {
            txn.add(t.as_ref(), None)?;
        }

        if notify && self.config.messaging {
            journal.append(ChangeEvent {
                event_type,
                timestamp: ctx.now,
                removed,
                added,
                resource_types,
                actor,
            });
        }
        Ok(())
    }

    /// Finds the closest existing ancestor and records containment,
    /// materializing pairtree segments for the gaps.
    fn set_containment(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        new_graph: &Graph,
    ) -> Result<(), ResourceError> {
        let parent_uid = if uid.contains('/') {
            self.find_parent_or_create_pairtree(txn, journal, ctx, uid)?
        } else {
            ROOT_UID.to_owned()
        };

        let urn = self.tbox.uid_to_urn(uid);
        let parent_urn = self.tbox.uid_to_urn(&parent_uid);
        let containment = Triple::new(parent_urn.clone(), ldp::CONTAINS, urn.clone());
        self.modify_resource(
            txn,
            journal,
            ctx,
            &parent_urn,
            EventType::Update,
            Vec::new(),
            vec![containment],
            true,
        )?;
        self.add_dc_ic_rel(txn, journal, ctx, &urn, &parent_urn, new_graph)
    }

    /// Walks path ancestors from the deepest up; the first existing one is
    /// the parent, the missing ones in between become pairtree nodes.
    fn find_parent_or_create_pairtree(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
    ) -> Result<String, ResourceError> {
        let components: Vec<&str> = uid.split('/').collect();
        let mut ancestors = Vec::new();
        for end in (1..components.len()).rev() {
            ancestors.push(components[..end].join("/"));
        }

        let mut parent_uid = ROOT_UID.to_owned();
        let mut current_child = uid.to_owned();
        let mut segments = Vec::new();
        for ancestor in ancestors {
            if self.is_stored(txn, &self.tbox.uid_to_urn(&ancestor))? {
                parent_uid = ancestor;
                break;
            }
            segments.push((ancestor.clone(), current_child));
            current_child = ancestor;
        }

        for (segment_uid, child_uid) in segments {
            self.create_path_segment(txn, journal, ctx, &segment_uid, &child_uid, &parent_uid, uid)?;
        }
        Ok(parent_uid)
    }

    /// Creates a pairtree node with a hidden containment statement, so the
    /// chain from the real parent down to the new resource stays connected.
    #[allow(clippy::too_many_arguments)]
    fn create_path_segment(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        child_uid: &str,
        real_parent_uid: &str,
        leaf_uid: &str,
    ) -> Result<(), ResourceError> {
        debug!("creating pairtree segment {uid}");
        let urn = self.tbox.uid_to_urn(uid);
        let child = self.tbox.uid_to_urn(child_uid);
        let leaf = self.tbox.uid_to_urn(leaf_uid);
        let real_parent = self.tbox.uid_to_urn(real_parent_uid);
        let added = vec![
            Triple::new(urn.clone(), fcsystem::CONTAINS, child),
            Triple::new(urn.clone(), ldp::CONTAINS, leaf),
            Triple::new(urn.clone(), rdf::TYPE, ldp::CONTAINER),
            Triple::new(urn.clone(), rdf::TYPE, ldp::BASIC_CONTAINER),
            Triple::new(urn.clone(), rdf::TYPE, ldp::RDF_SOURCE),
            Triple::new(urn.clone(), rdf::TYPE, fcrepo::PAIRTREE),
            Triple::new(urn.clone(), fcrepo::HAS_PARENT, real_parent),
        ];
        self.modify_resource(
            txn,
            journal,
            ctx,
            &urn,
            EventType::Create,
            Vec::new(),
            added,
            false,
        )?;

        // A segment just below the root hangs off the root node.
        if !uid.contains('/') {
            let root = self.tbox.uid_to_urn(ROOT_UID);
            let added = vec![Triple::new(root.clone(), fcsystem::CONTAINS, urn)];
            self.modify_resource(
                txn,
                journal,
                ctx,
                &root,
                EventType::Update,
                Vec::new(),
                added,
                false,
            )?;
        }
        Ok(())
    }

    /// Adds membership triples mandated by a direct or indirect container
    /// parent.
    #[allow(clippy::too_many_arguments)]
    fn add_dc_ic_rel(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        urn: &NamedNode,
        parent_urn: &NamedNode,
        new_graph: &Graph,
    ) -> Result<(), ResourceError> {
        let parent = self.subject_graph(txn, parent_urn)?;
        let mut added = vec![Triple::new(
            urn.clone(),
            fcrepo::HAS_PARENT,
            parent_urn.clone(),
        )];

        let membership_resource = parent
            .object_for_subject_predicate(parent_urn, ldp::MEMBERSHIP_RESOURCE)
            .and_then(|t| match t {
                TermRef::NamedNode(n) => Some(self.tbox.localize_iri(n.as_str())),
                _ => None,
            });
        let member_relation = parent
            .object_for_subject_predicate(parent_urn, ldp::HAS_MEMBER_RELATION)
            .and_then(|t| match t {
                TermRef::NamedNode(n) => Some(n.into_owned()),
                _ => None,
            });

        if let (Some(m), Some(r)) = (membership_resource, member_relation) {
            if parent.contains(TripleRef::new(parent_urn, rdf::TYPE, ldp::DIRECT_CONTAINER)) {
                debug!("parent is a direct container, adding membership triple");
                added.push(Triple::new(m, r, urn.clone()));
            } else if parent.contains(TripleRef::new(
                parent_urn,
                rdf::TYPE,
                ldp::INDIRECT_CONTAINER,
            )) {
                let inserted_content = parent
                    .object_for_subject_predicate(parent_urn, ldp::INSERTED_CONTENT_RELATION)
                    .and_then(|t| match t {
                        TermRef::NamedNode(n) => Some(n.into_owned()),
                        _ => None,
                    });
                if let Some(icr) = inserted_content {
                    let target = new_graph
                        .object_for_subject_predicate(urn, icr.as_ref())
                        .map(TermRef::into_owned);
                    if let Some(target) = target {
                        debug!("parent is an indirect container, adding membership triple");
                        added.push(Triple::new(m, r, target));
                    }
                }
            }
        }

        self.modify_resource(
            txn,
            journal,
            ctx,
            urn,
            EventType::Update,
            Vec::new(),
            added,
            true,
        )
    }

    /// All resources under a uid through `ldp:contains`, deepest last.
    fn descendants(
        &self,
        txn: &StoreWriteTxn<'_>,
        uid: &str,
    ) -> Result<Vec<String>, ResourceError> {
        let mut found = Vec::new();
        let mut stack = vec![uid.to_owned()];
        while let Some(current) = stack.pop() {
            let urn = self.tbox.uid_to_urn(&current);
            for t in txn.match_triples(Some(urn.as_ref().into()), Some(ldp::CONTAINS), None)? {
                if let Term::NamedNode(child) = t.object {
                    if let Some(child_uid) = self.tbox.iri_to_uid(child.as_str()) {
                        if !found.contains(&child_uid) {
                            found.push(child_uid.clone());
                            stack.push(child_uid);
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Replaces a resource with a tombstone, snapshotting it first so it
    /// can be resurrected.
    fn bury(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        inbound: bool,
        tombstone_pointer: Option<&NamedNode>,
    ) -> Result<(), ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        let graph = self.subject_graph(txn, &urn)?;
        if graph.is_empty() || self.tombstone_since(&graph).is_some() {
            return Ok(());
        }
        info!("burying resource {urn}");
        self.snapshot(txn, journal, ctx, uid, None, false)?;

        let removed: Vec<Triple> = graph.iter().map(TripleRef::into_owned).collect();
        let added = match tombstone_pointer {
            Some(pointer) => vec![Triple::new(
                urn.clone(),
                fcsystem::TOMBSTONE,
                pointer.clone(),
            )],
            None => vec![
                Triple::new(urn.clone(), rdf::TYPE, fcsystem::TOMBSTONE_CLASS),
                Triple::new(urn.clone(), fcrepo::CREATED, xsd_datetime(ctx.now)),
            ],
        };
        self.modify_resource(txn, journal, ctx, &urn, EventType::Delete, removed, added, true)?;

        if inbound {
            self.remove_inbound(txn, journal, ctx, &urn)?;
        }
        Ok(())
    }

    /// Removes every triple pointing at `urn`, resource by resource.
    fn remove_inbound(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        urn: &NamedNode,
    ) -> Result<(), ResourceError> {
        let inbound = txn.match_triples(None, None, Some(urn.as_ref().into()))?;
        let mut by_subject: HashMap<Subject, Vec<Triple>> = HashMap::new();
        for t in inbound {
            // The tombstone's own statements stay in place.
            if t.subject == urn.clone().into() {
                continue;
            }
            by_subject.entry(t.subject.clone()).or_default().push(t);
        }
        for (subject, removed) in by_subject {
            let Subject::NamedNode(subject) = subject else {
                continue;
            };
            self.modify_resource(
                txn,
                journal,
                ctx,
                &subject,
                EventType::Update,
                removed,
                Vec::new(),
                true,
            )?;
        }
        Ok(())
    }

    /// Erases a resource, its tombstone and all its version snapshots.
    fn purge_resource(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        uid: &str,
        inbound: bool,
    ) -> Result<(), ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        let versions = self.version_subjects(txn, uid)?;
        let stored = self.is_stored(txn, &urn)?;
        if !stored && versions.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        info!("purging resource {urn}");

        if let (Some(content), Ok(ResourceKind::Binary { .. })) =
            (&self.content, self.stored_kind(txn, &urn))
        {
            if let Some(digest) = self.stored_digest(txn, &urn)? {
                if let Err(e) = content.delete(uid, &digest) {
                    warn!("could not delete binary content of {urn}: {e}");
                }
            }
        }

        for version in versions {
            txn.remove(Some(version.as_ref().into()), None, None, None)?;
        }
        txn.remove(Some(urn.as_ref().into()), None, None, None)?;
        if inbound {
            txn.remove(None, None, Some(urn.as_ref().into()), None)?;
        }
        Ok(())
    }

    fn stored_kind(
        &self,
        txn: &StoreWriteTxn<'_>,
        urn: &NamedNode,
    ) -> Result<ResourceKind, ResourceError> {
        let graph = self.subject_graph(txn, urn)?;
        if graph.contains(TripleRef::new(urn, rdf::TYPE, ldp::NON_RDF_SOURCE)) {
            Ok(ResourceKind::Binary {
                mimetype: None,
                filename: None,
            })
        } else {
            Ok(ResourceKind::RdfSource)
        }
    }

    fn stored_digest(
        &self,
        txn: &StoreWriteTxn<'_>,
        urn: &NamedNode,
    ) -> Result<Option<String>, ResourceError> {
        let graph = self.subject_graph(txn, urn)?;
        Ok(graph
            .object_for_subject_predicate(urn, premis::HAS_MESSAGE_DIGEST)
            .and_then(|t| match t {
                TermRef::NamedNode(n) => n.as_str().rsplit(':').next().map(ToOwned::to_owned),
                _ => None,
            }))
    }

    /// The version snapshot subjects of a resource, in no particular
    /// order.
    fn version_subjects<T: StoreRead>(
        &self,
        txn: &T,
        uid: &str,
    ) -> Result<Vec<NamedNode>, ResourceError> {
        let prefix = format!(
            "{}/{VERSIONS_CONT_LABEL}/",
            self.tbox.uid_to_urn(uid).as_str()
        );
        let mut versions = Vec::new();
        for t in txn.match_triples(None, Some(rdf::TYPE), Some(fcrepo::VERSION.into()))? {
            if let Subject::NamedNode(subject) = t.subject {
                if subject.as_str().starts_with(&prefix) {
                    versions.push(subject);
                }
            }
        }
        Ok(versions)
    }

    /// The most recent version snapshot by creation time.
    fn latest_version<T: StoreRead>(
        &self,
        txn: &T,
        uid: &str,
    ) -> Result<Option<NamedNode>, ResourceError> {
        let mut latest: Option<(OffsetDateTime, NamedNode)> = None;
        for version in self.version_subjects(txn, uid)? {
            let graph = self.subject_graph(txn, &version)?;
            let created = graph
                .object_for_subject_predicate(&version, fcrepo::CREATED)
                .and_then(|t| match t {
                    TermRef::Literal(l) => parse_xsd_datetime(l.value()),
                    _ => None,
                });
            let Some(created) = created else {
                continue;
            };
            if latest.as_ref().is_none_or(|(ts, _)| created > *ts) {
                latest = Some((created, version));
            }
        }
        Ok(latest.map(|(_, version)| version))
    }

    fn version_labels<T: StoreRead>(
        &self,
        txn: &T,
        uid: &str,
    ) -> Result<HashSet<String>, ResourceError> {
        let mut labels = HashSet::new();
        for version in self.version_subjects(txn, uid)? {
            let graph = self.subject_graph(txn, &version)?;
            if let Some(TermRef::Literal(l)) =
                graph.object_for_subject_predicate(&version, fcrepo::HAS_VERSION_LABEL)
            {
                labels.insert(l.value().to_owned());
            }
        }
        Ok(labels)
    }

    /// Copies the current metadata graph under a fresh version URN and
    /// links the live resource to it.
    #[allow(clippy::too_many_arguments)]
    fn snapshot(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        label: Option<&str>,
        notify: bool,
    ) -> Result<NamedNode, ResourceError> {
        let existing = self.version_labels(txn, uid)?;
        let label = match label {
            Some(label) if !label.is_empty() && !existing.contains(label) => label.to_owned(),
            _ => mint_uuid(),
        };

        let urn = self.tbox.uid_to_urn(uid);
        let vers_uid = format!("{uid}/{VERSIONS_CONT_LABEL}");
        let ver_uid = format!("{vers_uid}/{label}");
        let ver_urn = self.tbox.uid_to_urn(&ver_uid);
        debug!("snapshotting {urn} as {ver_urn}");

        let metadata = self.subject_graph(txn, &urn)?;
        let excluded_predicates = [
            fcrepo::HAS_PARENT,
            fcrepo::HAS_VERSION,
            fcrepo::HAS_VERSIONS,
            premis::HAS_MESSAGE_DIGEST,
        ];
        let excluded_types = [fcrepo::BINARY, fcrepo::CONTAINER, fcrepo::RESOURCE];
        let mut added = vec![
            Triple::new(ver_urn.clone(), rdf::TYPE, fcrepo::VERSION),
            Triple::new(
                ver_urn.clone(),
                fcrepo::HAS_VERSION_LABEL,
                Literal::new_simple_literal(label.as_str()),
            ),
        ];
        for t in metadata.iter() {
            if excluded_predicates.contains(&t.predicate) {
                continue;
            }
            if t.predicate == rdf::TYPE
                && matches!(t.object, TermRef::NamedNode(o) if excluded_types.contains(&o))
            {
                continue;
            }
            added.push(Triple::new(
                ver_urn.clone(),
                t.predicate.into_owned(),
                t.object.into_owned(),
            ));
        }
        self.modify_resource(
            txn,
            journal,
            ctx,
            &ver_urn,
            EventType::Create,
            Vec::new(),
            added,
            false,
        )?;

        let admin = vec![
            Triple::new(urn.clone(), fcrepo::HAS_VERSION, ver_urn.clone()),
            Triple::new(
                urn.clone(),
                fcrepo::HAS_VERSIONS,
                self.tbox.uid_to_urn(&vers_uid),
            ),
        ];
        self.modify_resource(
            txn,
            journal,
            ctx,
            &urn,
            EventType::Update,
            Vec::new(),
            admin,
            notify,
        )?;
        Ok(ver_urn)
    }
}

/// Removes triples that appear in both deltas; they would annul each
/// other.
fn dedup_deltas(stored: &Graph, new: &Graph) -> (Vec<Triple>, Vec<Triple>) {
    let removed = stored
        .iter()
        .filter(|t| !new.contains(*t))
        .map(TripleRef::into_owned)
        .collect();
    let added = new
        .iter()
        .filter(|t| !stored.contains(*t))
        .map(TripleRef::into_owned)
        .collect();
    (removed, added)
}

/// Replaces all values of a predicate with a single one.
fn set_value(graph: &mut Graph, subject: &NamedNode, predicate: NamedNodeRef<'_>, value: Term) {
    let old: Vec<Triple> = graph
        .objects_for_subject_predicate(subject, predicate)
        .map(|o| Triple::new(subject.clone(), predicate.into_owned(), o.into_owned()))
        .collect();
    for t in old {
        graph.remove(&t);
    }
    let triple = Triple::new(subject.clone(), predicate.into_owned(), value);
    graph.insert(&triple);
}

/// Rewrites the payload of a POST onto the freshly minted resource URN.
/// The payload may speak about at most one named subject.
fn reroot_graph(graph: &Graph, target: &NamedNode) -> Graph {
    let mut out = Graph::default();
    for t in graph.iter() {
        let subject: Subject = match t.subject {
            SubjectRef::NamedNode(_) => target.clone().into(),
            other => other.into_owned(),
        };
        let triple = Triple::new(subject, t.predicate.into_owned(), t.object.into_owned());
        out.insert(&triple);
    }
    out
}

fn join_uid(parent_uid: &str, child: &str) -> String {
    let child = child.trim_matches('/');
    if parent_uid.is_empty() {
        child.to_owned()
    } else {
        format!("{parent_uid}/{child}")
    }
}

fn mint_uuid() -> String {
    Uuid::new_v4().to_string()
}

fn join_iris(iris: HashSet<NamedNode>) -> String {
    let mut iris: Vec<String> = iris.into_iter().map(|n| n.as_str().to_owned()).collect();
    iris.sort_unstable();
    iris.join(", ")
}
