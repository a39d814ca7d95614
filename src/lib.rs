//! # oxldp
//!
//! The storage core of an LDP-style repository: a transactional,
//! context-aware RDF quad store backed by LMDB, together with the
//! resource-level protocol that maps LDP verbs onto quads with managed
//! metadata, containment hierarchy, versioning and tombstones.
//!
//! The two entry points are [`storage::QuadStore`], the low-level indexed
//! quad store, and [`repo::Repository`], the LDP resource layer on top of
//! it. HTTP framing, content negotiation and the messaging transport are
//! out of scope: requests arrive here as graphs and parsed header values,
//! and committed changes leave through an [`event::EventSink`].
//!
//! Usage example:
//! ```
//! use oxldp::model::*;
//! use oxldp::repo::{Repository, ReprOptions, RequestContext};
//!
//! let dir = tempfile::tempdir()?;
//! let repo = Repository::open(dir.path(), "http://example.org/ldp")?;
//! let ctx = RequestContext::default();
//!
//! let uid = repo.post(&ctx, "", Some("my-resource"), &Graph::default())?;
//! let graph = repo.get(&uid, &ReprOptions::default())?;
//! assert!(!graph.is_empty());
//! # Result::<_, Box<dyn std::error::Error>>::Ok(())
//! ```

pub mod config;
pub mod event;
pub mod model;
pub mod repo;
pub mod storage;
pub mod toolbox;
pub mod vocab;
