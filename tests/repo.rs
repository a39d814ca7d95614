#![cfg(test)]

use oxldp::config::{RefIntegrity, RepoConfig};
use oxldp::event::{ChangeEvent, EventSink, EventType};
use oxldp::model::vocab::rdf;
use oxldp::model::*;
use oxldp::repo::{
    DeleteOptions, Handling, OpOutcome, Repository, ReprOptions, RequestContext, ResourceError,
};
use oxldp::toolbox::parse_prefer;
use oxldp::vocab::{fcrepo, fcsystem, ldp};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const WEBROOT: &str = "http://example.org/ldp";
const TITLE: &str = "http://purl.org/dc/terms/title";

fn named(iri: &str) -> NamedNode {
    NamedNode::new_unchecked(iri)
}

fn uri(uid: &str) -> NamedNode {
    if uid.is_empty() {
        named(WEBROOT)
    } else {
        named(&format!("{WEBROOT}/{uid}"))
    }
}

fn graph_of(triples: impl IntoIterator<Item = Triple>) -> Graph {
    let mut graph = Graph::default();
    for t in triples {
        graph.insert(&t);
    }
    graph
}

fn titled(uid: &str, title: &str) -> Graph {
    graph_of([Triple::new(
        uri(uid),
        named(TITLE),
        Literal::new_simple_literal(title),
    )])
}

fn title_of(graph: &Graph, uid: &str) -> Option<String> {
    graph
        .object_for_subject_predicate(&uri(uid), &named(TITLE))
        .and_then(|t| match t {
            TermRef::Literal(l) => Some(l.value().to_owned()),
            _ => None,
        })
}

fn object_str(graph: &Graph, uid: &str, predicate: NamedNodeRef<'_>) -> Option<String> {
    graph
        .object_for_subject_predicate(&uri(uid), predicate)
        .map(|t| t.to_string())
}

#[derive(Clone, Default)]
struct VecSink {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl VecSink {
    fn event_types(&self) -> Vec<EventType> {
        self.events.lock().unwrap().iter().map(|e| e.event_type).collect()
    }

    fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl EventSink for VecSink {
    fn dispatch(&self, event: ChangeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn open_repo(dir: &TempDir) -> Result<Repository, Box<dyn Error>> {
    Ok(Repository::open(dir.path(), WEBROOT)?)
}

#[test]
fn put_then_get_roundtrips_user_triples() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    let outcome = repo.put(&ctx, "obj1", &titled("obj1", "hello"), Handling::default())?;
    assert_eq!(outcome, OpOutcome::Created);

    let graph = repo.get("obj1", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "obj1").as_deref(), Some("hello"));
    // Server-managed triples are present by default...
    assert!(object_str(&graph, "obj1", fcrepo::CREATED).is_some());
    assert!(graph.contains(TripleRef::new(&uri("obj1"), rdf::TYPE, ldp::RDF_SOURCE)));
    // ...but the digest never is.
    assert!(object_str(&graph, "obj1", oxldp::vocab::premis::HAS_MESSAGE_DIGEST).is_none());

    // Stripped view keeps only user triples.
    let minimal = repo.get(
        "obj1",
        &ReprOptions {
            incl_srv_mgd: false,
            ..ReprOptions::default()
        },
    )?;
    assert_eq!(title_of(&minimal, "obj1").as_deref(), Some("hello"));
    assert!(object_str(&minimal, "obj1", fcrepo::CREATED).is_none());
    Ok(())
}

#[test]
fn replace_preserves_creation_metadata() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "obj2", &titled("obj2", "one"), Handling::default())?;
    let created_before = object_str(
        &repo.get("obj2", &ReprOptions::default())?,
        "obj2",
        fcrepo::CREATED,
    );

    let later = RequestContext::default();
    let outcome = repo.put(&later, "obj2", &titled("obj2", "two"), Handling::default())?;
    assert_eq!(outcome, OpOutcome::Updated);

    let graph = repo.get("obj2", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "obj2").as_deref(), Some("two"));
    assert_eq!(object_str(&graph, "obj2", fcrepo::CREATED), created_before);
    Ok(())
}

#[test]
fn strict_handling_rejects_server_managed_terms() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    let payload = graph_of([Triple::new(
        uri("bad"),
        fcrepo::CREATED.into_owned(),
        Literal::new_simple_literal("2020-01-01T00:00:00Z"),
    )]);
    let err = repo.put(&ctx, "bad", &payload, Handling::Strict).unwrap_err();
    assert!(matches!(err, ResourceError::ServerManagedTerm { .. }));
    // Nothing was written.
    assert!(matches!(
        repo.get("bad", &ReprOptions::default()).unwrap_err(),
        ResourceError::NotFound(_)
    ));

    // Lenient handling strips the offender and accepts the rest.
    let mut payload = titled("bad", "kept");
    payload.insert(TripleRef::new(
        &uri("bad"),
        fcrepo::CREATED,
        &Literal::new_simple_literal("2020-01-01T00:00:00Z"),
    ));
    repo.put(&ctx, "bad", &payload, Handling::Lenient)?;
    let graph = repo.get("bad", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "bad").as_deref(), Some("kept"));
    assert_ne!(
        object_str(&graph, "bad", fcrepo::CREATED).as_deref(),
        Some("\"2020-01-01T00:00:00Z\"")
    );
    Ok(())
}

#[test]
fn payloads_about_other_subjects_are_rejected() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    let payload = graph_of([Triple::new(
        uri("someone-else"),
        named(TITLE),
        Literal::new_simple_literal("not mine"),
    )]);
    let err = repo.put(&ctx, "mine", &payload, Handling::default()).unwrap_err();
    assert!(matches!(err, ResourceError::SingleSubject { .. }));
    Ok(())
}

#[test]
fn post_creates_contained_children() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    let uid = repo.post(&ctx, "", Some("child"), &Graph::default())?;
    assert_eq!(uid, "child");

    let root = repo.get("", &ReprOptions::default())?;
    assert!(root.contains(TripleRef::new(&uri(""), ldp::CONTAINS, &uri("child"))));

    // A taken slug falls back to a fresh uuid.
    let second = repo.post(&ctx, "", Some("child"), &Graph::default())?;
    assert_ne!(second, "child");
    assert!(repo.exists(&second)?);

    // POST into a missing parent is refused.
    assert!(matches!(
        repo.post(&ctx, "nowhere", None, &Graph::default()).unwrap_err(),
        ResourceError::NotFound(_)
    ));
    Ok(())
}

#[test]
fn deep_slugs_materialize_pairtree_segments() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    let uid = repo.post(&ctx, "", Some("a/b/c/d"), &Graph::default())?;
    assert_eq!(uid, "a/b/c/d");
    assert!(repo.exists("a/b/c/d")?);

    for segment in ["a", "a/b", "a/b/c"] {
        let graph = repo.get(segment, &ReprOptions::default())?;
        assert!(
            graph.contains(TripleRef::new(&uri(segment), rdf::TYPE, fcrepo::PAIRTREE)),
            "{segment} should be a pairtree node"
        );
        assert!(graph.contains(TripleRef::new(
            &uri(segment),
            ldp::CONTAINS,
            &uri("a/b/c/d")
        )));
        assert!(graph.contains(TripleRef::new(&uri(segment), fcrepo::HAS_PARENT, &uri(""))));
    }
    // The segment chain is connected by the hidden containment edge.
    let a = repo.get("a", &ReprOptions::default())?;
    assert!(a.contains(TripleRef::new(&uri("a"), fcsystem::CONTAINS, &uri("a/b"))));
    let root = repo.get("", &ReprOptions::default())?;
    assert!(root.contains(TripleRef::new(&uri(""), fcsystem::CONTAINS, &uri("a"))));

    // Posting below an existing pairtree chain uses the deepest existing
    // resource as parent.
    let nested = repo.post(&ctx, "a/b", Some("x"), &Graph::default())?;
    assert_eq!(nested, "a/b/x");
    Ok(())
}

#[test]
fn direct_containers_infer_membership() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();
    let members = named("http://members.example.org/m");
    let relation = named("http://example.org/rel/member");

    let payload = graph_of([
        Triple::new(uri("dc"), rdf::TYPE.into_owned(), ldp::DIRECT_CONTAINER.into_owned()),
        Triple::new(uri("dc"), ldp::MEMBERSHIP_RESOURCE.into_owned(), members.clone()),
        Triple::new(uri("dc"), ldp::HAS_MEMBER_RELATION.into_owned(), relation.clone()),
    ]);
    repo.put(&ctx, "dc", &payload, Handling::default())?;

    let uid = repo.post(&ctx, "dc", Some("m1"), &Graph::default())?;
    assert_eq!(uid, "dc/m1");

    let txn = repo.store().read_txn()?;
    let membership: Vec<Triple> = txn
        .triples(
            Some(members.as_ref().into()),
            Some(relation.as_ref()),
            None,
            None,
        )?
        .collect::<Result<_, _>>()?;
    assert_eq!(membership.len(), 1);
    assert_eq!(
        membership[0].object,
        Term::from(named("info:fcres/dc/m1"))
    );
    Ok(())
}

#[test]
fn indirect_containers_infer_membership_from_content() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();
    let members = named("http://members.example.org/m");
    let relation = named("http://example.org/rel/member");
    let proxy_for = named("http://example.org/rel/proxyFor");
    let target = named("http://target.example.org/t");

    let payload = graph_of([
        Triple::new(uri("ic"), rdf::TYPE.into_owned(), ldp::INDIRECT_CONTAINER.into_owned()),
        Triple::new(uri("ic"), ldp::MEMBERSHIP_RESOURCE.into_owned(), members.clone()),
        Triple::new(uri("ic"), ldp::HAS_MEMBER_RELATION.into_owned(), relation.clone()),
        Triple::new(
            uri("ic"),
            ldp::INSERTED_CONTENT_RELATION.into_owned(),
            proxy_for.clone(),
        ),
    ]);
    repo.put(&ctx, "ic", &payload, Handling::default())?;

    let child_payload = graph_of([Triple::new(
        named("urn:whatever:placeholder"),
        proxy_for.clone(),
        target.clone(),
    )]);
    repo.post(&ctx, "ic", Some("proxy"), &child_payload)?;

    let txn = repo.store().read_txn()?;
    let membership: Vec<Triple> = txn
        .triples(
            Some(members.as_ref().into()),
            Some(relation.as_ref()),
            None,
            None,
        )?
        .collect::<Result<_, _>>()?;
    assert_eq!(membership.len(), 1);
    assert_eq!(membership[0].object, Term::from(target));
    Ok(())
}

#[test]
fn delete_leaves_a_resurrectable_tombstone() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let sink = VecSink::default();
    let repo = Repository::open(dir.path(), WEBROOT)?.with_event_sink(Box::new(sink.clone()));
    let ctx = RequestContext::default();

    let mut payload = titled("t1", "precious");
    payload.insert(TripleRef::new(&uri("t1"), rdf::TYPE, ldp::CONTAINER));
    repo.put(&ctx, "t1", &payload, Handling::default())?;

    repo.delete(&ctx, "t1", DeleteOptions::default())?;
    assert!(matches!(
        repo.get("t1", &ReprOptions::default()).unwrap_err(),
        ResourceError::Gone { .. }
    ));
    // Creating over a tombstone is disallowed.
    assert!(matches!(
        repo.put(&ctx, "t1", &titled("t1", "again"), Handling::default())
            .unwrap_err(),
        ResourceError::Gone { .. }
    ));
    assert!(sink.event_types().contains(&EventType::Delete));

    repo.resurrect(&ctx, "t1")?;
    let graph = repo.get("t1", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "t1").as_deref(), Some("precious"));
    assert!(graph.contains(TripleRef::new(&uri("t1"), rdf::TYPE, fcrepo::RESOURCE)));
    assert!(graph.contains(TripleRef::new(&uri("t1"), rdf::TYPE, fcrepo::CONTAINER)));
    assert!(!graph.contains(TripleRef::new(&uri("t1"), rdf::TYPE, fcrepo::VERSION)));
    Ok(())
}

#[test]
fn delete_buries_descendants_with_a_pointer() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "p", &Graph::default(), Handling::default())?;
    let child = repo.post(&ctx, "p", Some("c1"), &Graph::default())?;
    assert_eq!(child, "p/c1");

    repo.delete(&ctx, "p", DeleteOptions::default())?;
    assert!(matches!(
        repo.get("p/c1", &ReprOptions::default()).unwrap_err(),
        ResourceError::Gone { .. }
    ));

    let txn = repo.store().read_txn()?;
    assert!(txn.contains(
        TripleRef::new(
            &named("info:fcres/p/c1"),
            fcsystem::TOMBSTONE,
            &named("info:fcres/p")
        ),
        None
    )?);
    Ok(())
}

#[test]
fn purge_makes_a_uid_reusable() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let sink = VecSink::default();
    let repo = Repository::open(dir.path(), WEBROOT)?.with_event_sink(Box::new(sink.clone()));
    let ctx = RequestContext::default();

    repo.put(&ctx, "gone1", &titled("gone1", "x"), Handling::default())?;
    repo.delete(&ctx, "gone1", DeleteOptions::default())?;
    let events_before = sink.len();

    repo.purge("gone1")?;
    // Purging emits nothing.
    assert_eq!(sink.len(), events_before);
    assert!(matches!(
        repo.get("gone1", &ReprOptions::default()).unwrap_err(),
        ResourceError::NotFound(_)
    ));

    let uid = repo.post(&ctx, "", Some("gone1"), &Graph::default())?;
    assert_eq!(uid, "gone1");
    Ok(())
}

#[test]
fn versions_snapshot_and_revert() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "v1", &titled("v1", "one"), Handling::default())?;
    let ver_uri = repo.create_version(&ctx, "v1", Some("v0"))?;
    assert!(ver_uri.as_str().ends_with("v1/fcr:versions/v0"));

    repo.put(&ctx, "v1", &titled("v1", "two"), Handling::default())?;
    assert_eq!(
        title_of(&repo.get("v1", &ReprOptions::default())?, "v1").as_deref(),
        Some("two")
    );

    let info = repo.get_version_info("v1")?;
    assert!(!info.is_empty());
    let snapshot = repo.get_version("v1", "v0")?;
    assert!(snapshot.iter().any(|t| {
        matches!(t.object, TermRef::Literal(l) if l.value() == "one")
    }));

    let outcome = repo.revert_to_version(&ctx, "v1", "v0", true)?;
    assert_eq!(outcome, OpOutcome::Updated);
    assert_eq!(
        title_of(&repo.get("v1", &ReprOptions::default())?, "v1").as_deref(),
        Some("one")
    );
    Ok(())
}

#[test]
fn patch_applies_a_sparql_delta() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "pt", &titled("pt", "old"), Handling::default())?;
    let target = uri("pt");
    let update = format!(
        "DELETE {{ <{target}> <{TITLE}> ?o }} INSERT {{ <{target}> <{TITLE}> \"new\" }} WHERE {{ <{target}> <{TITLE}> ?o }}",
        target = target.as_str(),
    );
    repo.patch(&ctx, "pt", &update, Handling::default())?;

    let graph = repo.get("pt", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "pt").as_deref(), Some("new"));

    // Protected terms are refused under strict handling.
    let offending = format!(
        "INSERT DATA {{ <{target}> <http://fedora.info/definitions/v4/repository#created> \"2020\" }}",
        target = target.as_str(),
    );
    let err = repo.patch(&ctx, "pt", &offending, Handling::Strict).unwrap_err();
    assert!(matches!(err, ResourceError::ServerManagedTerm { .. }));

    // Updates about another subject are refused.
    let foreign = format!(
        "INSERT DATA {{ <{other}> <{TITLE}> \"x\" }}",
        other = uri("other").as_str(),
    );
    let err = repo.patch(&ctx, "pt", &foreign, Handling::default()).unwrap_err();
    assert!(matches!(err, ResourceError::SingleSubject { .. }));
    Ok(())
}

#[test]
fn referential_integrity_modes() -> Result<(), Box<dyn Error>> {
    let strict_dir = TempDir::new()?;
    let strict = Repository::open_with(
        strict_dir.path(),
        WEBROOT,
        RepoConfig {
            referential_integrity: RefIntegrity::Strict,
            messaging: true,
        },
    )?;
    let ctx = RequestContext::default();

    let dangling = graph_of([Triple::new(uri("a"), named("urn:rel:sees"), uri("missing"))]);
    let err = strict.put(&ctx, "a", &dangling, Handling::default()).unwrap_err();
    assert!(matches!(err, ResourceError::RefIntViolation(_)));

    // Once the target exists the same payload is accepted.
    strict.put(&ctx, "missing", &Graph::default(), Handling::default())?;
    strict.put(&ctx, "a", &dangling, Handling::default())?;
    let graph = strict.get("a", &ReprOptions::default())?;
    assert!(graph.contains(TripleRef::new(&uri("a"), &named("urn:rel:sees"), &uri("missing"))));

    // Lenient mode prunes the dangling link instead.
    let lenient_dir = TempDir::new()?;
    let lenient = Repository::open(lenient_dir.path(), WEBROOT)?;
    let mut payload = titled("a", "kept");
    payload.insert(TripleRef::new(&uri("a"), &named("urn:rel:sees"), &uri("missing")));
    lenient.put(&ctx, "a", &payload, Handling::default())?;
    let graph = lenient.get("a", &ReprOptions::default())?;
    assert_eq!(title_of(&graph, "a").as_deref(), Some("kept"));
    assert!(!graph.contains(TripleRef::new(&uri("a"), &named("urn:rel:sees"), &uri("missing"))));
    Ok(())
}

#[test]
fn inbound_references_are_included_on_request() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "target", &Graph::default(), Handling::default())?;
    let payload = graph_of([Triple::new(uri("source"), named("urn:rel:sees"), uri("target"))]);
    repo.put(&ctx, "source", &payload, Handling::default())?;

    let options = ReprOptions {
        incl_inbound: true,
        ..ReprOptions::default()
    };
    let graph = repo.get("target", &options)?;
    assert!(graph.contains(TripleRef::new(
        &uri("source"),
        &named("urn:rel:sees"),
        &uri("target")
    )));

    // Without the option the inbound edge is absent.
    let graph = repo.get("target", &ReprOptions::default())?;
    assert!(!graph.contains(TripleRef::new(
        &uri("source"),
        &named("urn:rel:sees"),
        &uri("target")
    )));
    Ok(())
}

#[test]
fn prefer_header_drives_representation_options() {
    let prefer = parse_prefer(
        "return=representation; \
         include=\"http://fedora.info/definitions/v4/repository#InboundReferences \
         http://fedora.info/definitions/v4/repository#EmbedResources\"; \
         omit=\"http://fedora.info/definitions/v4/repository#ServerManaged\"",
    );
    let options = ReprOptions::from_prefer(&prefer);
    assert!(options.incl_inbound);
    assert!(options.embed_children);
    assert!(!options.incl_srv_mgd);
    assert!(options.incl_children);

    let handling = Handling::from_prefer(&parse_prefer("handling=strict"));
    assert_eq!(handling, Handling::Strict);
}

#[test]
fn head_exposes_etag_and_modification_data() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir)?;
    let ctx = RequestContext::default();

    repo.put(&ctx, "headed", &titled("headed", "x"), Handling::default())?;
    let head = repo.head("headed")?;
    let etag = head.etag.expect("an etag");
    assert!(etag.starts_with("W/\""));
    let last_modified = head.last_modified.expect("a last-modified value");
    assert!(last_modified.ends_with("GMT"));
    assert!(head.link_types.contains(&ldp::RESOURCE.into_owned()));
    Ok(())
}

#[test]
fn events_flow_only_after_commit() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let sink = VecSink::default();
    let repo = Repository::open(dir.path(), WEBROOT)?.with_event_sink(Box::new(sink.clone()));
    let ctx = RequestContext::default();

    repo.put(&ctx, "ev", &titled("ev", "x"), Handling::default())?;
    assert!(sink.event_types().contains(&EventType::Create));
    let after_put = sink.len();

    // A failing operation leaves no trace in the sink.
    let foreign = graph_of([Triple::new(
        uri("not-ev"),
        named(TITLE),
        Literal::new_simple_literal("x"),
    )]);
    assert!(repo.put(&ctx, "ev2", &foreign, Handling::default()).is_err());
    assert_eq!(sink.len(), after_put);
    Ok(())
}
