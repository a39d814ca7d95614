#![cfg(test)]

use oxldp::model::*;
use oxldp::storage::QuadStore;
use std::collections::HashSet;
use std::error::Error;
use tempfile::TempDir;

fn named(iri: &str) -> NamedNode {
    NamedNode::new_unchecked(iri)
}

fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(named(s), named(p), named(o))
}

fn all_triples(
    txn: &oxldp::storage::StoreReadTxn<'_>,
    context: Option<GraphNameRef<'_>>,
) -> Result<HashSet<Triple>, Box<dyn Error>> {
    Ok(txn
        .triples(None, None, None, context)?
        .collect::<Result<HashSet<_>, _>>()?)
}

#[test]
fn creates_a_single_triple() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t = triple("urn:test:s", "urn:test:p", "urn:test:o");

    let mut txn = store.write_txn()?;
    assert!(txn.add(t.as_ref(), None)?);
    txn.commit()?;

    let txn = store.read_txn()?;
    assert_eq!(all_triples(&txn, None)?, HashSet::from([t.clone()]));
    assert!(txn.contains(t.as_ref(), None)?);

    let s = named("urn:test:s");
    let p = named("urn:test:p");
    let o = named("urn:test:o");
    let by_subject: Vec<Triple> = txn
        .triples(Some(s.as_ref().into()), None, None, None)?
        .collect::<Result<_, _>>()?;
    let by_predicate: Vec<Triple> = txn
        .triples(None, Some(p.as_ref()), None, None)?
        .collect::<Result<_, _>>()?;
    let by_object: Vec<Triple> = txn
        .triples(None, None, Some(o.as_ref().into()), None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(by_subject, vec![t.clone()]);
    assert_eq!(by_predicate, vec![t.clone()]);
    assert_eq!(by_object, vec![t]);
    Ok(())
}

#[test]
fn matches_patterns_with_two_bound_terms() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t1 = triple("urn:test:s1", "urn:test:p1", "urn:test:o1");
    let t2 = triple("urn:test:s1", "urn:test:p2", "urn:test:o2");

    let mut txn = store.write_txn()?;
    txn.add(t1.as_ref(), None)?;
    txn.add(t2.as_ref(), None)?;
    txn.commit()?;

    let txn = store.read_txn()?;
    let s1 = named("urn:test:s1");
    let p1 = named("urn:test:p1");
    let p2 = named("urn:test:p2");
    let o2 = named("urn:test:o2");

    let sp: Vec<Triple> = txn
        .triples(Some(s1.as_ref().into()), Some(p1.as_ref()), None, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(sp, vec![t1.clone()]);

    let so: Vec<Triple> = txn
        .triples(
            Some(s1.as_ref().into()),
            None,
            Some(o2.as_ref().into()),
            None,
        )?
        .collect::<Result<_, _>>()?;
    assert_eq!(so, vec![t2.clone()]);

    let po: Vec<Triple> = txn
        .triples(None, Some(p2.as_ref()), Some(o2.as_ref().into()), None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(po, vec![t2]);

    // Mismatched combinations yield nothing.
    let none: Vec<Triple> = txn
        .triples(Some(s1.as_ref().into()), Some(p1.as_ref()), Some(o2.as_ref().into()), None)?
        .collect::<Result<_, _>>()?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn unknown_terms_match_nothing() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let mut txn = store.write_txn()?;
    txn.add(triple("urn:a", "urn:b", "urn:c").as_ref(), None)?;
    txn.commit()?;

    let txn = store.read_txn()?;
    let stranger = named("urn:never:interned");
    let result: Vec<Triple> = txn
        .triples(Some(stranger.as_ref().into()), None, None, None)?
        .collect::<Result<_, _>>()?;
    assert!(result.is_empty());
    Ok(())
}

#[test]
fn adding_twice_is_a_noop_and_removal_undoes_it() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t = triple("urn:test:s", "urn:test:p", "urn:test:o");

    let mut txn = store.write_txn()?;
    assert!(txn.add(t.as_ref(), None)?);
    assert!(!txn.add(t.as_ref(), None)?);
    assert_eq!(txn.len(None)?, 1);
    assert_eq!(txn.remove(None, None, None, None)?, 1);
    assert!(!txn.contains(t.as_ref(), None)?);
    assert_eq!(txn.len(None)?, 0);
    txn.commit()?;
    Ok(())
}

#[test]
fn removes_by_pattern() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t1 = triple("urn:s:1", "urn:p:1", "urn:o:1");
    let t2 = triple("urn:s:1", "urn:p:2", "urn:o:2");
    let t3 = triple("urn:s:2", "urn:p:1", "urn:o:1");

    let mut txn = store.write_txn()?;
    for t in [&t1, &t2, &t3] {
        txn.add(t.as_ref(), None)?;
    }
    let s1 = named("urn:s:1");
    assert_eq!(txn.remove(Some(s1.as_ref().into()), None, None, None)?, 2);
    txn.commit()?;

    let txn = store.read_txn()?;
    assert_eq!(all_triples(&txn, None)?, HashSet::from([t3]));
    Ok(())
}

#[test]
fn separates_contexts() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let g1 = named("urn:bogus:graph#a");
    let g2 = named("urn:bogus:graph#b");
    let t1 = triple("urn:s:1", "urn:p:1", "urn:o:1");
    let t2 = triple("urn:s:2", "urn:p:2", "urn:o:2");
    let shared = triple("urn:s:3", "urn:p:3", "urn:o:3");

    let mut txn = store.write_txn()?;
    txn.add_graph(g1.as_ref().into())?;
    txn.add(t1.as_ref(), Some(g1.as_ref().into()))?;
    txn.add(t2.as_ref(), None)?;
    txn.add(shared.as_ref(), Some(g1.as_ref().into()))?;
    txn.add(shared.as_ref(), Some(g2.as_ref().into()))?;
    txn.commit()?;

    let txn = store.read_txn()?;
    assert_eq!(
        all_triples(&txn, Some(g1.as_ref().into()))?,
        HashSet::from([t1.clone(), shared.clone()])
    );
    assert_eq!(
        all_triples(&txn, Some(GraphNameRef::DefaultGraph))?,
        HashSet::from([t2.clone()])
    );
    assert_eq!(
        all_triples(&txn, None)?,
        HashSet::from([t1.clone(), t2.clone(), shared.clone()])
    );
    let contexts = txn.contexts(None)?;
    assert!(contexts.contains(&g1.clone().into()));
    assert!(contexts.contains(&g2.clone().into()));
    drop(txn);

    // Removing one graph leaves other contexts alone.
    let mut txn = store.write_txn()?;
    txn.remove_graph(g1.as_ref().into())?;
    txn.commit()?;

    let txn = store.read_txn()?;
    assert_eq!(
        all_triples(&txn, None)?,
        HashSet::from([t2.clone(), shared.clone()])
    );
    assert_eq!(all_triples(&txn, Some(g1.as_ref().into()))?, HashSet::new());
    assert_eq!(
        all_triples(&txn, Some(g2.as_ref().into()))?,
        HashSet::from([shared.clone()])
    );
    // Lookup indices still cover the shared triple.
    let s3 = named("urn:s:3");
    let found: Vec<Triple> = txn
        .triples(Some(s3.as_ref().into()), None, None, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(found, vec![shared]);
    assert!(!txn.contexts(None)?.contains(&g1.into()));
    Ok(())
}

#[test]
fn lists_the_contexts_of_a_triple() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let g = named("urn:graph:1");
    let t = triple("urn:s", "urn:p", "urn:o");

    let mut txn = store.write_txn()?;
    txn.add(t.as_ref(), None)?;
    txn.add(t.as_ref(), Some(g.as_ref().into()))?;
    txn.commit()?;

    let txn = store.read_txn()?;
    let contexts = txn.contexts(Some(t.as_ref()))?;
    assert_eq!(contexts.len(), 2);
    assert!(contexts.contains(&GraphName::DefaultGraph));
    assert!(contexts.contains(&g.into()));
    assert_eq!(txn.len(None)?, 2);
    Ok(())
}

#[test]
fn rolls_back_on_abort() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t = triple("urn:nogo:s", "urn:nogo:p", "urn:nogo:o");

    let mut txn = store.write_txn()?;
    txn.add(t.as_ref(), None)?;
    txn.abort();

    let txn = store.read_txn()?;
    assert!(all_triples(&txn, None)?.is_empty());
    Ok(())
}

#[test]
fn rolls_back_when_a_scoped_write_fails() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let t = triple("urn:nogo:s", "urn:nogo:p", "urn:nogo:o");

    let result: Result<(), oxldp::storage::StorageError> = store.write(|txn| {
        txn.add(t.as_ref(), None)?;
        Err(std::io::Error::other("simulated failure").into())
    });
    assert!(result.is_err());

    let txn = store.read_txn()?;
    assert!(all_triples(&txn, None)?.is_empty());
    Ok(())
}

#[test]
fn binds_namespaces_in_both_directions() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let bindings = [
        ("ns1", "http://test.org/ns#"),
        ("ns2", "http://my_org.net/ns#"),
        ("ns3", "urn:test:"),
        ("ns4", "info:myinst/graph#"),
    ];

    let mut txn = store.write_txn()?;
    for (prefix, namespace) in bindings {
        txn.bind(prefix, namespace)?;
    }
    txn.commit()?;

    let txn = store.read_txn()?;
    assert_eq!(txn.namespaces()?.len(), bindings.len());
    for (prefix, namespace) in bindings {
        assert_eq!(txn.namespace(prefix)?.as_deref(), Some(namespace));
        assert_eq!(txn.prefix(namespace)?.as_deref(), Some(prefix));
    }
    assert_eq!(txn.namespace("missing")?, None);
    Ok(())
}

#[test]
fn persists_across_reopen() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let t = triple("urn:keep:s", "urn:keep:p", "urn:keep:o");
    {
        let store = QuadStore::open(dir.path())?;
        let mut txn = store.write_txn()?;
        txn.add(t.as_ref(), None)?;
        txn.bind("ex", "http://example.com/")?;
        txn.commit()?;
    }

    let store = QuadStore::open(dir.path())?;
    let txn = store.read_txn()?;
    assert!(txn.contains(t.as_ref(), None)?);
    assert_eq!(txn.namespace("ex")?.as_deref(), Some("http://example.com/"));
    Ok(())
}

#[test]
fn rebuilds_the_index_environment() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let g = named("urn:graph:r");
    let t1 = triple("urn:r:s1", "urn:r:p1", "urn:r:o1");
    let t2 = triple("urn:r:s1", "urn:r:p2", "urn:r:o2");

    let mut txn = store.write_txn()?;
    txn.add(t1.as_ref(), None)?;
    txn.add(t2.as_ref(), Some(g.as_ref().into()))?;
    txn.bind("ex", "http://example.com/")?;
    txn.commit()?;

    store.rebuild_index()?;

    let txn = store.read_txn()?;
    let s1 = named("urn:r:s1");
    let p1 = named("urn:r:p1");
    let by_subject: HashSet<Triple> = txn
        .triples(Some(s1.as_ref().into()), None, None, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(by_subject, HashSet::from([t1.clone(), t2.clone()]));
    let two_bound: Vec<Triple> = txn
        .triples(Some(s1.as_ref().into()), Some(p1.as_ref()), None, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(two_bound, vec![t1]);
    assert_eq!(
        all_triples(&txn, Some(g.as_ref().into()))?,
        HashSet::from([t2])
    );
    assert_eq!(txn.prefix("http://example.com/")?.as_deref(), Some("ex"));
    // Interning still finds existing terms after the rebuild.
    drop(txn);
    let mut txn = store.write_txn()?;
    assert!(!txn.add(
        Triple::new(named("urn:r:s1"), named("urn:r:p1"), named("urn:r:o1")).as_ref(),
        None
    )?);
    txn.abort();
    Ok(())
}

#[test]
fn stores_every_literal_shape() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = QuadStore::open(dir.path())?;
    let s = named("urn:lit:s");
    let p = named("urn:lit:p");
    let plain = Literal::new_simple_literal("plain");
    let tagged = Literal::new_language_tagged_literal_unchecked("bonjour", "fr");
    let typed = Literal::new_typed_literal("42", vocab::xsd::INTEGER);

    let mut txn = store.write_txn()?;
    for object in [&plain, &tagged, &typed] {
        txn.add(TripleRef::new(&s, &p, object), None)?;
    }
    txn.commit()?;

    let txn = store.read_txn()?;
    let found: HashSet<Triple> = txn
        .triples(Some(s.as_ref().into()), None, None, None)?
        .collect::<Result<_, _>>()?;
    let expected: HashSet<Triple> = [plain, tagged, typed]
        .into_iter()
        .map(|l| Triple::new(s.clone(), p.clone(), l))
        .collect();
    assert_eq!(found, expected);
    Ok(())
}
