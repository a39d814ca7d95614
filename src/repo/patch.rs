//! SPARQL Update application for PATCH requests.
//!
//! Parsing is delegated to `spargebra`; this module walks the parsed
//! operations and applies the data forms (`INSERT DATA`, `DELETE DATA` and
//! variable-free or subject-bound `DELETE`/`INSERT … WHERE`) against the
//! resource's graph. Anything requiring a query engine is rejected.

use super::{
    Handling, OpOutcome, Repository, ResourceError, protected_predicates, srv_mgd_predicates,
    srv_mgd_types,
};
use crate::event::{EventJournal, EventType};
use crate::storage::StoreWriteTxn;
use crate::toolbox::xsd_datetime;
use crate::vocab::{fcrepo, premis};
use oxrdf::vocab::rdf;
use oxrdf::{Literal, NamedNode, Subject, Term, Triple};
use spargebra::Update;
use spargebra::GraphUpdateOperation;
use spargebra::term::{
    GraphNamePattern, GroundSubject, GroundTerm, GroundTermPattern, NamedNodePattern, TermPattern,
};
use tracing::info;

use super::RequestContext;

impl Repository {
    pub(super) fn apply_patch(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        uid: &str,
        update: &str,
        handling: Handling,
    ) -> Result<OpOutcome, ResourceError> {
        let urn = self.tbox.uid_to_urn(uid);
        let stored = self.subject_graph(txn, &urn)?;
        if stored.is_empty() {
            return Err(ResourceError::NotFound(uid.to_owned()));
        }
        self.guard_tombstone(uid, &stored)?;

        let update = Update::parse(update, None)?;
        let mut removed = Vec::new();
        let mut added = Vec::new();
        for operation in update.operations {
            match operation {
                GraphUpdateOperation::InsertData { data } => {
                    for quad in data {
                        self.require_default_graph(&quad.graph_name)?;
                        let subject = self.localize_subject(quad.subject)?;
                        let object = self.localize_term(quad.object);
                        added.push(Triple::new(subject, quad.predicate, object));
                    }
                }
                GraphUpdateOperation::DeleteData { data } => {
                    for quad in data {
                        self.require_default_graph(&quad.graph_name)?;
                        let subject = if let GroundSubject::NamedNode(n) = quad.subject {
                            Subject::from(self.tbox.localize_iri(n.as_str()))
                        } else {
                            return Err(ResourceError::UnsupportedUpdate(
                                "triple terms in DELETE DATA".to_owned(),
                            ));
                        };
                        let object = if let GroundTerm::NamedNode(n) = quad.object {
                            Term::from(self.tbox.localize_iri(n.as_str()))
                        } else if let GroundTerm::Literal(l) = quad.object {
                            Term::from(l)
                        } else {
                            return Err(ResourceError::UnsupportedUpdate(
                                "triple terms in DELETE DATA".to_owned(),
                            ));
                        };
                        removed.push(Triple::new(subject, quad.predicate, object));
                    }
                }
                GraphUpdateOperation::DeleteInsert {
                    delete,
                    insert,
                    using,
                    pattern: _,
                } => {
                    if using.is_some() {
                        return Err(ResourceError::UnsupportedUpdate(
                            "USING clauses".to_owned(),
                        ));
                    }
                    for pattern in delete {
                        self.collect_pattern_deletions(&stored, &urn, pattern, &mut removed)?;
                    }
                    for pattern in insert {
                        self.collect_pattern_insertion(pattern, &mut added)?;
                    }
                }
                GraphUpdateOperation::Load { .. } => {
                    return Err(ResourceError::UnsupportedUpdate("LOAD".to_owned()));
                }
                GraphUpdateOperation::Clear { .. } => {
                    return Err(ResourceError::UnsupportedUpdate("CLEAR".to_owned()));
                }
                GraphUpdateOperation::Create { .. } => {
                    return Err(ResourceError::UnsupportedUpdate("CREATE".to_owned()));
                }
                GraphUpdateOperation::Drop { .. } => {
                    return Err(ResourceError::UnsupportedUpdate("DROP".to_owned()));
                }
            }
        }

        for t in removed.iter().chain(added.iter()) {
            if let Subject::NamedNode(subject) = &t.subject {
                if *subject != urn {
                    return Err(ResourceError::SingleSubject {
                        resource: urn.as_str().to_owned(),
                        subject: subject.as_str().to_owned(),
                    });
                }
            }
        }
        let (removed, added) = self.screen_patch_delta(removed, added, handling)?;

        self.modify_resource(txn, journal, ctx, &urn, EventType::Update, removed, added, true)?;
        self.refresh_write_metadata(txn, journal, ctx, &urn)
            .map(|()| OpOutcome::Updated)
    }

    fn require_default_graph(
        &self,
        graph_name: &spargebra::term::GraphName,
    ) -> Result<(), ResourceError> {
        if *graph_name == spargebra::term::GraphName::DefaultGraph {
            Ok(())
        } else {
            Err(ResourceError::UnsupportedUpdate(
                "named graph targets".to_owned(),
            ))
        }
    }

    fn localize_subject(&self, subject: Subject) -> Result<Subject, ResourceError> {
        if let Subject::NamedNode(n) = subject {
            Ok(self.tbox.localize_iri(n.as_str()).into())
        } else if let Subject::BlankNode(b) = subject {
            Ok(b.into())
        } else {
            Err(ResourceError::UnsupportedUpdate(
                "triple terms in INSERT DATA".to_owned(),
            ))
        }
    }

    fn localize_term(&self, term: Term) -> Term {
        if let Term::NamedNode(n) = term {
            self.tbox.localize_iri(n.as_str()).into()
        } else {
            term
        }
    }

    /// Expands one `DELETE WHERE` pattern against the stored graph. The
    /// subject must be the resource itself; predicate and object may be
    /// variables acting as wildcards.
    fn collect_pattern_deletions(
        &self,
        stored: &oxrdf::Graph,
        urn: &NamedNode,
        pattern: spargebra::term::GroundQuadPattern,
        removed: &mut Vec<Triple>,
    ) -> Result<(), ResourceError> {
        match &pattern.graph_name {
            GraphNamePattern::DefaultGraph | GraphNamePattern::Variable(_) => {}
            GraphNamePattern::NamedNode(_) => {
                return Err(ResourceError::UnsupportedUpdate(
                    "named graph targets".to_owned(),
                ));
            }
        }
        let subject = if let GroundTermPattern::NamedNode(n) = &pattern.subject {
            self.tbox.localize_iri(n.as_str())
        } else {
            return Err(ResourceError::UnsupportedUpdate(
                "non-IRI subjects in DELETE patterns".to_owned(),
            ));
        };
        if subject != *urn {
            return Err(ResourceError::SingleSubject {
                resource: urn.as_str().to_owned(),
                subject: subject.as_str().to_owned(),
            });
        }
        let predicate = match &pattern.predicate {
            NamedNodePattern::NamedNode(p) => Some(p.clone()),
            NamedNodePattern::Variable(_) => None,
        };
        let object = if let GroundTermPattern::NamedNode(n) = &pattern.object {
            Some(Term::from(self.tbox.localize_iri(n.as_str())))
        } else if let GroundTermPattern::Literal(l) = &pattern.object {
            Some(Term::from(l.clone()))
        } else if let GroundTermPattern::Variable(_) = &pattern.object {
            None
        } else {
            return Err(ResourceError::UnsupportedUpdate(
                "triple terms in DELETE patterns".to_owned(),
            ));
        };

        for t in stored.triples_for_subject(&subject) {
            let predicate_matches = predicate
                .as_ref()
                .is_none_or(|p| t.predicate == p.as_ref());
            let object_matches = object.as_ref().is_none_or(|o| t.object == o.as_ref());
            if predicate_matches && object_matches {
                removed.push(t.into_owned());
            }
        }
        Ok(())
    }

    /// Accepts one ground `INSERT` pattern; variables have no bindings
    /// without a query engine.
    fn collect_pattern_insertion(
        &self,
        pattern: spargebra::term::QuadPattern,
        added: &mut Vec<Triple>,
    ) -> Result<(), ResourceError> {
        match &pattern.graph_name {
            GraphNamePattern::DefaultGraph => {}
            _ => {
                return Err(ResourceError::UnsupportedUpdate(
                    "named graph targets".to_owned(),
                ));
            }
        }
        let subject: Subject = if let TermPattern::NamedNode(n) = &pattern.subject {
            self.tbox.localize_iri(n.as_str()).into()
        } else if let TermPattern::BlankNode(b) = &pattern.subject {
            b.clone().into()
        } else {
            return Err(ResourceError::UnsupportedUpdate(
                "variables in INSERT templates".to_owned(),
            ));
        };
        let predicate = match &pattern.predicate {
            NamedNodePattern::NamedNode(p) => p.clone(),
            NamedNodePattern::Variable(_) => {
                return Err(ResourceError::UnsupportedUpdate(
                    "variables in INSERT templates".to_owned(),
                ));
            }
        };
        let object: Term = if let TermPattern::NamedNode(n) = &pattern.object {
            self.tbox.localize_iri(n.as_str()).into()
        } else if let TermPattern::BlankNode(b) = &pattern.object {
            b.clone().into()
        } else if let TermPattern::Literal(l) = &pattern.object {
            l.clone().into()
        } else {
            return Err(ResourceError::UnsupportedUpdate(
                "variables in INSERT templates".to_owned(),
            ));
        };
        added.push(Triple::new(subject, predicate, object));
        Ok(())
    }

    /// Screens protected and server-managed terms out of a PATCH delta.
    fn screen_patch_delta(
        &self,
        removed: Vec<Triple>,
        added: Vec<Triple>,
        handling: Handling,
    ) -> Result<(Vec<Triple>, Vec<Triple>), ResourceError> {
        if handling == Handling::None {
            return Ok((removed, added));
        }
        let protected = protected_predicates();
        let mgd_predicates = srv_mgd_predicates();
        let mgd_types = srv_mgd_types();
        let offending = |t: &Triple| {
            protected.contains(&t.predicate.as_ref())
                || mgd_predicates.contains(&t.predicate.as_ref())
                || (t.predicate.as_ref() == rdf::TYPE
                    && matches!(&t.object, Term::NamedNode(o) if mgd_types.contains(&o.as_ref())))
        };
        if handling == Handling::Strict {
            if let Some(t) = removed.iter().chain(added.iter()).find(|t| offending(t)) {
                return Err(ResourceError::ServerManagedTerm {
                    position: "term",
                    terms: t.predicate.as_str().to_owned(),
                });
            }
            return Ok((removed, added));
        }
        let strip = |triples: Vec<Triple>| {
            triples
                .into_iter()
                .filter(|t| {
                    if offending(t) {
                        info!("removing server-managed triple from update: {t}");
                        false
                    } else {
                        true
                    }
                })
                .collect()
        };
        Ok((strip(removed), strip(added)))
    }

    /// Refreshes the digest and modification metadata after a delta.
    fn refresh_write_metadata(
        &self,
        txn: &mut StoreWriteTxn<'_>,
        journal: &mut EventJournal,
        ctx: &RequestContext,
        urn: &NamedNode,
    ) -> Result<(), ResourceError> {
        let current = self.subject_graph(txn, urn)?;
        let checksum = self.tbox.rdf_checksum(&current);
        let mut removed = Vec::new();
        for predicate in [
            premis::HAS_MESSAGE_DIGEST,
            fcrepo::LAST_MODIFIED,
            fcrepo::LAST_MODIFIED_BY,
        ] {
            for object in current.objects_for_subject_predicate(urn, predicate) {
                removed.push(Triple::new(
                    urn.clone(),
                    predicate.into_owned(),
                    object.into_owned(),
                ));
            }
        }
        let added = vec![
            Triple::new(
                urn.clone(),
                premis::HAS_MESSAGE_DIGEST,
                NamedNode::new_unchecked(format!("urn:sha1:{checksum}")),
            ),
            Triple::new(urn.clone(), fcrepo::LAST_MODIFIED, xsd_datetime(ctx.now)),
            Triple::new(
                urn.clone(),
                fcrepo::LAST_MODIFIED_BY,
                Literal::new_simple_literal(ctx.actor.as_str()),
            ),
        ];
        self.modify_resource(
            txn,
            journal,
            ctx,
            urn,
            EventType::Update,
            removed,
            added,
            false,
        )
    }
}
