//! Canonical serialization and hashing of RDF terms.
//!
//! Every term stored in the repository is serialized to a tagged byte
//! string and addressed by the SHA-1 of that serialization. The encoding is
//! structural: language tags and datatypes are part of the payload, and a
//! dedicated tag marks the reserved default graph identifier so that graph
//! names and regular terms share one keyspace.

use crate::storage::error::{CorruptionError, StorageError};
use oxrdf::vocab::xsd;
use oxrdf::{
    BlankNode, GraphName, GraphNameRef, Literal, NamedNode, Subject, SubjectRef, Term, TermRef,
};
use sha1::{Digest, Sha1};
use std::str;

const TYPE_NAMED_NODE_ID: u8 = 1;
const TYPE_BLANK_NODE_ID: u8 = 2;
const TYPE_STRING_LITERAL_ID: u8 = 3;
const TYPE_LANG_STRING_LITERAL_ID: u8 = 4;
const TYPE_TYPED_LITERAL_ID: u8 = 5;
const TYPE_DEFAULT_GRAPH_ID: u8 = 6;

/// Number of bytes of a term hash.
pub const TERM_HASH_LENGTH: usize = 20;

/// SHA-1 digest of a serialized term. Collisions are treated as corruption.
pub fn term_hash(serialized: &[u8]) -> [u8; TERM_HASH_LENGTH] {
    let mut hasher = Sha1::new();
    hasher.update(serialized);
    hasher.finalize().into()
}

/// Serializes a term to its canonical byte representation.
pub fn encode_term(term: TermRef<'_>) -> Result<Vec<u8>, StorageError> {
    let mut buffer = Vec::new();
    if let TermRef::NamedNode(node) = term {
        buffer.push(TYPE_NAMED_NODE_ID);
        buffer.extend_from_slice(node.as_str().as_bytes());
    } else if let TermRef::BlankNode(node) = term {
        buffer.push(TYPE_BLANK_NODE_ID);
        buffer.extend_from_slice(node.as_str().as_bytes());
    } else if let TermRef::Literal(literal) = term {
        if let Some(language) = literal.language() {
            buffer.push(TYPE_LANG_STRING_LITERAL_ID);
            buffer.push(u8::try_from(language.len()).map_err(|_| {
                StorageError::Other("language tag longer than 255 bytes".into())
            })?);
            buffer.extend_from_slice(language.as_bytes());
            buffer.extend_from_slice(literal.value().as_bytes());
        } else {
            let datatype = literal.datatype();
            if datatype == xsd::STRING {
                buffer.push(TYPE_STRING_LITERAL_ID);
                buffer.extend_from_slice(literal.value().as_bytes());
            } else {
                buffer.push(TYPE_TYPED_LITERAL_ID);
                let datatype_len = u32::try_from(datatype.as_str().len())
                    .map_err(|_| StorageError::Other("datatype IRI too long".into()))?;
                buffer.extend_from_slice(&datatype_len.to_be_bytes());
                buffer.extend_from_slice(datatype.as_str().as_bytes());
                buffer.extend_from_slice(literal.value().as_bytes());
            }
        }
    } else {
        return Err(StorageError::Other(
            "embedded triple terms are not supported by this store".into(),
        ));
    }
    Ok(buffer)
}

/// Serializes a term found at a subject position.
pub fn encode_subject(subject: SubjectRef<'_>) -> Result<Vec<u8>, StorageError> {
    if let SubjectRef::NamedNode(node) = subject {
        encode_term(node.into())
    } else if let SubjectRef::BlankNode(node) = subject {
        encode_term(node.into())
    } else {
        Err(StorageError::Other(
            "embedded triple terms are not supported by this store".into(),
        ))
    }
}

/// Serializes a graph name, mapping the default graph to its reserved marker.
pub fn encode_graph_name(graph_name: GraphNameRef<'_>) -> Result<Vec<u8>, StorageError> {
    match graph_name {
        GraphNameRef::NamedNode(node) => encode_term(node.into()),
        GraphNameRef::BlankNode(node) => encode_term(node.into()),
        GraphNameRef::DefaultGraph => Ok(vec![TYPE_DEFAULT_GRAPH_ID]),
    }
}

/// Deserializes a term from its canonical byte representation.
pub fn decode_term(buffer: &[u8]) -> Result<Term, CorruptionError> {
    let (&tag, payload) = buffer
        .split_first()
        .ok_or_else(|| CorruptionError::msg("empty serialized term"))?;
    match tag {
        TYPE_NAMED_NODE_ID => Ok(NamedNode::new_unchecked(decode_str(payload)?).into()),
        TYPE_BLANK_NODE_ID => Ok(BlankNode::new_unchecked(decode_str(payload)?).into()),
        TYPE_STRING_LITERAL_ID => Ok(Literal::new_simple_literal(decode_str(payload)?).into()),
        TYPE_LANG_STRING_LITERAL_ID => {
            let (&language_len, rest) = payload
                .split_first()
                .ok_or_else(|| CorruptionError::msg("truncated language-tagged literal"))?;
            let language_len = usize::from(language_len);
            if rest.len() < language_len {
                return Err(CorruptionError::msg("truncated language tag"));
            }
            let language = decode_str(&rest[..language_len])?;
            let value = decode_str(&rest[language_len..])?;
            Ok(Literal::new_language_tagged_literal_unchecked(value, language).into())
        }
        TYPE_TYPED_LITERAL_ID => {
            if payload.len() < 4 {
                return Err(CorruptionError::msg("truncated typed literal"));
            }
            let datatype_len = u32::from_be_bytes(
                payload[..4]
                    .try_into()
                    .map_err(|_| CorruptionError::msg("truncated typed literal header"))?,
            ) as usize;
            let rest = &payload[4..];
            if rest.len() < datatype_len {
                return Err(CorruptionError::msg("truncated datatype IRI"));
            }
            let datatype = NamedNode::new_unchecked(decode_str(&rest[..datatype_len])?);
            let value = decode_str(&rest[datatype_len..])?;
            Ok(Literal::new_typed_literal(value, datatype).into())
        }
        TYPE_DEFAULT_GRAPH_ID => Err(CorruptionError::msg(
            "the default graph marker is not a valid term",
        )),
        _ => Err(CorruptionError::msg(format!(
            "unexpected term serialization tag {tag}"
        ))),
    }
}

/// Deserializes a term expected at a subject position.
pub fn decode_subject(buffer: &[u8]) -> Result<Subject, CorruptionError> {
    match decode_term(buffer)? {
        Term::NamedNode(node) => Ok(node.into()),
        Term::BlankNode(node) => Ok(node.into()),
        _ => Err(CorruptionError::msg(
            "a literal is stored at a subject position",
        )),
    }
}

/// Deserializes a term expected at a predicate position.
pub fn decode_predicate(buffer: &[u8]) -> Result<NamedNode, CorruptionError> {
    match decode_term(buffer)? {
        Term::NamedNode(node) => Ok(node),
        _ => Err(CorruptionError::msg(
            "a non-IRI term is stored at a predicate position",
        )),
    }
}

/// Deserializes a graph name, recognizing the reserved default graph marker.
pub fn decode_graph_name(buffer: &[u8]) -> Result<GraphName, CorruptionError> {
    if buffer == [TYPE_DEFAULT_GRAPH_ID] {
        return Ok(GraphName::DefaultGraph);
    }
    match decode_term(buffer)? {
        Term::NamedNode(node) => Ok(node.into()),
        Term::BlankNode(node) => Ok(node.into()),
        _ => Err(CorruptionError::msg(
            "a literal is stored at a graph name position",
        )),
    }
}

fn decode_str(buffer: &[u8]) -> Result<&str, CorruptionError> {
    str::from_utf8(buffer).map_err(|e| CorruptionError::msg(format!("invalid UTF-8: {e}")))
}
