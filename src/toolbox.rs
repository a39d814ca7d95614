//! Translation and hashing utilities shared by the resource layer.
//!
//! Resources are stored under internal `info:fcres/` URNs and exposed to
//! clients under the request webroot; the [`Toolbox`] converts between the
//! two in both directions, for single terms and whole graphs. It also
//! parses [RFC 7240](https://tools.ietf.org/html/rfc7240) `Prefer` headers
//! and computes the order-independent graph checksum used for
//! `premis:hasMessageDigest` and ETags.

use crate::vocab::premis;
use oxrdf::vocab::xsd;
use oxrdf::{Graph, Literal, NamedNode, Subject, SubjectRef, Term, TermRef, Triple};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// Namespace of internal resource URNs. The root resource is the bare
/// namespace IRI.
pub const FCRES_NS: &str = "info:fcres/";

/// Translates between public URIs under a webroot and internal URNs.
#[derive(Debug, Clone)]
pub struct Toolbox {
    webroot: String,
}

impl Toolbox {
    /// Creates a toolbox for a webroot such as `http://example.org/ldp`.
    /// A trailing slash is ignored.
    pub fn new(webroot: impl Into<String>) -> Self {
        let mut webroot = webroot.into();
        while webroot.ends_with('/') {
            webroot.pop();
        }
        Self { webroot }
    }

    pub fn webroot(&self) -> &str {
        &self.webroot
    }

    /// The internal URN of a resource uid. The empty uid names the root.
    pub fn uid_to_urn(&self, uid: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("{FCRES_NS}{uid}"))
    }

    /// The public URI of a resource uid.
    pub fn uid_to_uri(&self, uid: &str) -> NamedNode {
        if uid.is_empty() {
            NamedNode::new_unchecked(self.webroot.clone())
        } else {
            NamedNode::new_unchecked(format!("{}/{uid}", self.webroot))
        }
    }

    /// Extracts the uid out of an internal URN or a public URI, if the IRI
    /// belongs to this repository.
    pub fn iri_to_uid(&self, iri: &str) -> Option<String> {
        if let Some(uid) = iri.strip_prefix(FCRES_NS) {
            Some(uid.to_owned())
        } else if let Some(rest) = iri.strip_prefix(&self.webroot) {
            Some(rest.trim_matches('/').to_owned())
        } else {
            None
        }
    }

    /// Whether an IRI points into this repository, in either form.
    pub fn is_repo_iri(&self, iri: &str) -> bool {
        iri.starts_with(FCRES_NS)
            || iri == self.webroot
            || iri.starts_with(&format!("{}/", self.webroot))
    }

    /// Converts a public URI into an internal URN. IRIs outside the webroot
    /// pass through unchanged.
    pub fn localize_iri(&self, iri: &str) -> NamedNode {
        if iri.trim_end_matches('/') == self.webroot {
            NamedNode::new_unchecked(FCRES_NS)
        } else if let Some(rest) = iri.strip_prefix(&format!("{}/", self.webroot)) {
            NamedNode::new_unchecked(format!("{FCRES_NS}{rest}"))
        } else {
            NamedNode::new_unchecked(iri)
        }
    }

    /// Converts an internal URN into a public URI. IRIs outside the
    /// internal namespace pass through unchanged.
    pub fn globalize_iri(&self, iri: &str) -> NamedNode {
        if iri == FCRES_NS {
            NamedNode::new_unchecked(self.webroot.clone())
        } else if let Some(uid) = iri.strip_prefix(FCRES_NS) {
            NamedNode::new_unchecked(format!("{}/{uid}", self.webroot))
        } else {
            NamedNode::new_unchecked(iri)
        }
    }

    /// Rewrites webroot IRIs in subject and object position to URNs.
    pub fn localize_graph(&self, graph: &Graph) -> Graph {
        self.rewrite_graph(graph, |iri| self.localize_iri(iri))
    }

    /// Rewrites URNs in subject and object position to webroot IRIs.
    pub fn globalize_graph(&self, graph: &Graph) -> Graph {
        self.rewrite_graph(graph, |iri| self.globalize_iri(iri))
    }

    fn rewrite_graph(&self, graph: &Graph, rewrite: impl Fn(&str) -> NamedNode) -> Graph {
        let mut out = Graph::default();
        for t in graph.iter() {
            let subject: Subject = match t.subject {
                SubjectRef::NamedNode(n) => rewrite(n.as_str()).into(),
                other => other.into_owned(),
            };
            let object: Term = match t.object {
                TermRef::NamedNode(n) => rewrite(n.as_str()).into(),
                other => other.into_owned(),
            };
            let triple = Triple::new(subject, t.predicate.into_owned(), object);
            out.insert(&triple);
        }
        out
    }

    /// Checksum of a graph, independent of triple ordering.
    ///
    /// The previous digest statement is dropped first since it reflects the
    /// resource's prior state; the remaining triples are rendered
    /// canonically, sorted, and hashed.
    pub fn rdf_checksum(&self, graph: &Graph) -> String {
        let mut lines: Vec<String> = graph
            .iter()
            .filter(|t| t.predicate != premis::HAS_MESSAGE_DIGEST)
            .map(|t| t.to_string())
            .collect();
        lines.sort_unstable();
        let mut hasher = Sha1::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Splits a uuid into pairtree segments, mimicking fcrepo4 behavior.
    pub fn split_uuid(&self, uuid: &str) -> String {
        if uuid.len() < 8 {
            return uuid.to_owned();
        }
        format!(
            "{}/{}/{}/{}/{uuid}",
            &uuid[..2],
            &uuid[2..4],
            &uuid[4..6],
            &uuid[6..8]
        )
    }
}

/// An `xsd:dateTime` literal for a timestamp.
pub fn xsd_datetime(timestamp: OffsetDateTime) -> Literal {
    Literal::new_typed_literal(
        timestamp
            .to_offset(UtcOffset::UTC)
            .format(&Rfc3339)
            .unwrap_or_default(),
        xsd::DATE_TIME,
    )
}

/// Parses an `xsd:dateTime` literal value back into a timestamp.
pub fn parse_xsd_datetime(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// RFC 1123 rendition of a timestamp, for `Last-Modified` headers.
pub fn format_rfc1123(timestamp: OffsetDateTime) -> String {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    timestamp
        .to_offset(UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default()
}

/// A single preference of a `Prefer` header: an optional value plus
/// parameters.
#[derive(Debug, Clone, Default)]
pub struct Preference {
    pub value: Option<String>,
    pub parameters: HashMap<String, Option<String>>,
}

impl Preference {
    /// The whitespace-separated tokens of a parameter value.
    pub fn parameter_tokens(&self, name: &str) -> Vec<&str> {
        self.parameters
            .get(name)
            .and_then(|v| v.as_deref())
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Parses a `Prefer` header as per RFC 7240, excluding the `Prefer:` token.
///
/// Multiple preferences are separated by commas, parameters by semicolons;
/// quotes around values are stripped.
pub fn parse_prefer(header: &str) -> HashMap<String, Preference> {
    let mut preferences = HashMap::new();
    for part in header.split(',') {
        let mut tokens = part.split(';').map(str::trim);
        let Some(first) = tokens.next() else {
            continue;
        };
        if first.is_empty() {
            continue;
        }
        let (name, value) = split_param(first);
        let mut preference = Preference {
            value,
            parameters: HashMap::new(),
        };
        for token in tokens {
            if token.is_empty() {
                continue;
            }
            let (param, value) = split_param(token);
            preference.parameters.insert(param, value);
        }
        preferences.insert(name, preference);
    }
    preferences
}

fn split_param(token: &str) -> (String, Option<String>) {
    match token.split_once('=') {
        Some((name, value)) => (
            name.trim().to_owned(),
            Some(value.trim().trim_matches('"').to_owned()),
        ),
        None => (token.trim().to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::TripleRef;

    fn toolbox() -> Toolbox {
        Toolbox::new("http://localhost:8000/ldp")
    }

    #[test]
    fn translates_uids_in_both_directions() {
        let tbox = toolbox();
        assert_eq!(tbox.uid_to_urn("a/b").as_str(), "info:fcres/a/b");
        assert_eq!(
            tbox.uid_to_uri("a/b").as_str(),
            "http://localhost:8000/ldp/a/b"
        );
        assert_eq!(tbox.uid_to_uri("").as_str(), "http://localhost:8000/ldp");
        assert_eq!(tbox.iri_to_uid("info:fcres/a/b").as_deref(), Some("a/b"));
        assert_eq!(
            tbox.iri_to_uid("http://localhost:8000/ldp/a/b").as_deref(),
            Some("a/b")
        );
        assert_eq!(tbox.iri_to_uid("http://elsewhere.org/x"), None);
    }

    #[test]
    fn localizes_and_globalizes_graphs() {
        let tbox = toolbox();
        let uri = NamedNode::new_unchecked("http://localhost:8000/ldp/a");
        let p = NamedNode::new_unchecked("urn:p");
        let external = NamedNode::new_unchecked("http://elsewhere.org/x");
        let mut graph = Graph::default();
        graph.insert(TripleRef::new(&uri, &p, &external));

        let local = tbox.localize_graph(&graph);
        let urn = NamedNode::new_unchecked("info:fcres/a");
        assert!(local.contains(TripleRef::new(&urn, &p, &external)));

        let global = tbox.globalize_graph(&local);
        assert!(global.contains(TripleRef::new(&uri, &p, &external)));
    }

    #[test]
    fn checksum_ignores_order_and_previous_digest() {
        let tbox = toolbox();
        let s = NamedNode::new_unchecked("urn:s");
        let p1 = NamedNode::new_unchecked("urn:p1");
        let p2 = NamedNode::new_unchecked("urn:p2");
        let o = NamedNode::new_unchecked("urn:o");

        let mut first = Graph::default();
        first.insert(TripleRef::new(&s, &p1, &o));
        first.insert(TripleRef::new(&s, &p2, &o));
        let mut second = Graph::default();
        second.insert(TripleRef::new(&s, &p2, &o));
        second.insert(TripleRef::new(&s, &p1, &o));
        second.insert(TripleRef::new(
            &s,
            crate::vocab::premis::HAS_MESSAGE_DIGEST,
            &o,
        ));
        assert_eq!(tbox.rdf_checksum(&first), tbox.rdf_checksum(&second));
    }

    #[test]
    fn parses_prefer_headers() {
        let parsed = parse_prefer(
            "return=representation; include=\"http://a http://b\"; omit=\"http://c\", handling=lenient",
        );
        let ret = &parsed["return"];
        assert_eq!(ret.value.as_deref(), Some("representation"));
        assert_eq!(ret.parameter_tokens("include"), vec!["http://a", "http://b"]);
        assert_eq!(ret.parameter_tokens("omit"), vec!["http://c"]);
        assert_eq!(parsed["handling"].value.as_deref(), Some("lenient"));
    }

    #[test]
    fn splits_uuids_into_pairtree_segments() {
        assert_eq!(
            toolbox().split_uuid("0123456789ab"),
            "01/23/45/67/0123456789ab"
        );
    }
}
