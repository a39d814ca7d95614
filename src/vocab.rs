//! Provides ready to use [`NamedNodeRef`](crate::model::NamedNodeRef)s for the vocabularies the repository manages.

pub mod ldp {
    //! [Linked Data Platform](https://www.w3.org/TR/ldp/) vocabulary.
    use oxrdf::NamedNodeRef;

    /// The class of basic containers.
    pub const BASIC_CONTAINER: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#BasicContainer");
    /// The class of LDP containers.
    pub const CONTAINER: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#Container");
    /// Links a container with resources created through it.
    pub const CONTAINS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#contains");
    /// The class of direct containers.
    pub const DIRECT_CONTAINER: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#DirectContainer");
    /// Membership predicate a direct or indirect container adds on creation.
    pub const HAS_MEMBER_RELATION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#hasMemberRelation");
    /// The class of indirect containers.
    pub const INDIRECT_CONTAINER: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#IndirectContainer");
    /// Predicate read from a created member to find the membership object.
    pub const INSERTED_CONTENT_RELATION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#insertedContentRelation");
    /// The resource membership triples are added to.
    pub const MEMBERSHIP_RESOURCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#membershipResource");
    /// The class of resources whose state is not represented as RDF.
    pub const NON_RDF_SOURCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#NonRDFSource");
    /// The class of resources whose state is fully represented as RDF.
    pub const RDF_SOURCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#RDFSource");
    /// The class of HTTP-addressable resources.
    pub const RESOURCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#Resource");
}

pub mod fcrepo {
    //! [Fedora repository](http://fedora.info/definitions/v4/repository) vocabulary.
    use oxrdf::NamedNodeRef;

    /// The class of stored binaries.
    pub const BINARY: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Binary");
    /// `Prefer` token asking for containment triples.
    pub const CHILDREN: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Children");
    /// The class of repository containers.
    pub const CONTAINER: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Container");
    /// Creation timestamp.
    pub const CREATED: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#created");
    /// Creating agent.
    pub const CREATED_BY: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#createdBy");
    /// `Prefer` token asking for embedded child resource graphs.
    pub const EMBED_RESOURCES: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#EmbedResources");
    /// Containment parent of a resource.
    pub const HAS_PARENT: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#hasParent");
    /// Links a resource to one of its version snapshots.
    pub const HAS_VERSION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#hasVersion");
    /// Label of a version snapshot.
    pub const HAS_VERSION_LABEL: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "http://fedora.info/definitions/v4/repository#hasVersionLabel",
    );
    /// Links a resource to its version container.
    pub const HAS_VERSIONS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#hasVersions");
    /// `Prefer` token asking for inbound references.
    pub const INBOUND_REFERENCES: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "http://fedora.info/definitions/v4/repository#InboundReferences",
    );
    /// Last modification timestamp.
    pub const LAST_MODIFIED: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#lastModified");
    /// Last modifying agent.
    pub const LAST_MODIFIED_BY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "http://fedora.info/definitions/v4/repository#lastModifiedBy",
    );
    /// The class of synthetic path-segment containers.
    pub const PAIRTREE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Pairtree");
    /// The class of all repository resources.
    pub const RESOURCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Resource");
    /// `Prefer` token asking for server-managed triples.
    pub const SERVER_MANAGED: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#ServerManaged");
    /// The class of version snapshots.
    pub const VERSION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://fedora.info/definitions/v4/repository#Version");
}

pub mod premis {
    //! [PREMIS 3](https://www.loc.gov/premis/rdf/v1) preservation vocabulary.
    use oxrdf::NamedNodeRef;

    /// Message digest of the stored content or metadata graph.
    pub const HAS_MESSAGE_DIGEST: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.loc.gov/premis/rdf/v1#hasMessageDigest");
}

pub mod ebucore {
    //! [EBUcore](https://www.ebu.ch/metadata/ontologies/ebucore/) vocabulary, used for binary descriptions.
    use oxrdf::NamedNodeRef;

    /// Original filename of an uploaded binary.
    pub const FILENAME: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "http://www.ebu.ch/metadata/ontologies/ebucore/ebucore#filename",
    );
    /// MIME type of a stored binary.
    pub const HAS_MIME_TYPE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "http://www.ebu.ch/metadata/ontologies/ebucore/ebucore#hasMimeType",
    );
}

pub mod fcsystem {
    //! Repository-internal vocabulary, never exposed to clients.
    use oxrdf::NamedNodeRef;

    /// Parallel non-LDP containment edge between pairtree path segments.
    pub const CONTAINS: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("info:fcsystem/contains");
    /// Points from a buried descendant to the ancestor tombstone replacing it.
    pub const TOMBSTONE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("info:fcsystem/tombstone");
    /// The class of tombstones left behind by soft-deleted resources.
    pub const TOMBSTONE_CLASS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("info:fcsystem/Tombstone");
}
