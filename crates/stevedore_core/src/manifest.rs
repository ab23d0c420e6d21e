//! Typed manifest parsing.
//!
//! Manifest schemas form a closed set keyed by media type: the docker
//! schema2 image manifest, the OCI image manifest, the docker manifest
//! list, and the OCI image index. A process-wide [`ParserRegistry`] maps
//! each on-wire media type to its parser; there is no runtime subtype
//! hierarchy.
//!
//! Parsing is non-destructive: the stored payload is always the exact bytes
//! received from the client, because the manifest's digest is computed over
//! those bytes. The typed form only drives verification and metadata.
use std::collections::HashMap;

use bytes::Bytes;
use oci_spec::image::{ImageIndex, ImageManifest, MediaType};
use once_cell::sync::Lazy;

use crate::errors::ManifestError;

pub const MEDIA_TYPE_SCHEMA2_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_SCHEMA2_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

const MEDIA_TYPE_SCHEMA2_FOREIGN_LAYER: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
const MEDIA_TYPE_OCI_NONDISTRIBUTABLE_PREFIX: &str =
    "application/vnd.oci.image.layer.nondistributable.";

/// Deserialized manifest payload.
///
/// The docker schema2 forms share their shape with the OCI forms, so two
/// variants cover all four registered media types.
#[derive(Debug)]
pub enum ManifestSpec {
    Image(ImageManifest),
    Index(ImageIndex),
}

/// What a descriptor inside a manifest points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Config,
    Layer,
    Manifest,
}

/// A descriptor referenced by a manifest, flattened for verification.
///
/// `verifiable` is false for content the registry is not expected to hold
/// locally: foreign and non-distributable layers, and descriptors carrying
/// alternate `urls`.
#[derive(Clone, Debug)]
pub struct Reference {
    pub digest: String,
    pub media_type: String,
    pub kind: ReferenceKind,
    pub verifiable: bool,
}

/// A successfully parsed manifest: the typed payload plus the media type it
/// is stored (and later served) under.
#[derive(Debug)]
pub struct ParsedManifest {
    pub media_type: String,
    pub spec: ManifestSpec,
}

impl ParsedManifest {
    /// All descriptors this manifest references, in payload order.
    pub fn references(&self) -> Vec<Reference> {
        match &self.spec {
            ManifestSpec::Image(im) => {
                let config = im.config();
                let mut refs = vec![Reference {
                    digest: config.digest().to_string(),
                    media_type: config.media_type().to_string(),
                    kind: ReferenceKind::Config,
                    verifiable: true,
                }];
                refs.extend(im.layers().iter().map(|desc| {
                    let media_type = desc.media_type().to_string();
                    let foreign = is_foreign_layer(&media_type)
                        || desc.urls().as_ref().map_or(false, |u| !u.is_empty());
                    Reference {
                        digest: desc.digest().to_string(),
                        media_type,
                        kind: ReferenceKind::Layer,
                        verifiable: !foreign,
                    }
                }));
                refs
            }
            ManifestSpec::Index(ii) => ii
                .manifests()
                .iter()
                .map(|desc| Reference {
                    digest: desc.digest().to_string(),
                    media_type: desc.media_type().to_string(),
                    kind: ReferenceKind::Manifest,
                    verifiable: true,
                })
                .collect(),
        }
    }
}

fn is_foreign_layer(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_SCHEMA2_FOREIGN_LAYER
        || media_type.starts_with(MEDIA_TYPE_OCI_NONDISTRIBUTABLE_PREFIX)
}

enum PayloadShape {
    Image,
    Index,
}

/// A single registered manifest schema.
pub struct ManifestParser {
    media_type: &'static str,
    shape: PayloadShape,
}

impl ManifestParser {
    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    fn parse(&self, bytes: &Bytes) -> std::result::Result<ParsedManifest, ManifestError> {
        let spec = match self.shape {
            PayloadShape::Image => ManifestSpec::Image(
                serde_json::from_slice::<ImageManifest>(bytes)
                    .map_err(|e| ManifestError::InvalidPayload(format!("{e}")))?,
            ),
            PayloadShape::Index => ManifestSpec::Index(
                serde_json::from_slice::<ImageIndex>(bytes)
                    .map_err(|e| ManifestError::InvalidPayload(format!("{e}")))?,
            ),
        };
        Ok(ParsedManifest {
            media_type: self.media_type.to_string(),
            spec,
        })
    }
}

/// Media type → parser mapping, populated at startup and frozen.
pub struct ParserRegistry {
    entries: HashMap<&'static str, ManifestParser>,
}

impl ParserRegistry {
    fn with_parsers(parsers: Vec<ManifestParser>) -> Self {
        Self {
            entries: parsers.into_iter().map(|p| (p.media_type, p)).collect(),
        }
    }

    pub fn get(&self, media_type: &str) -> Option<&ManifestParser> {
        self.entries.get(media_type)
    }

    pub fn is_registered(&self, media_type: &str) -> bool {
        self.entries.contains_key(media_type)
    }
}

static REGISTRY: Lazy<ParserRegistry> = Lazy::new(|| {
    ParserRegistry::with_parsers(vec![
        ManifestParser {
            media_type: MEDIA_TYPE_SCHEMA2_MANIFEST,
            shape: PayloadShape::Image,
        },
        ManifestParser {
            media_type: MEDIA_TYPE_OCI_MANIFEST,
            shape: PayloadShape::Image,
        },
        ManifestParser {
            media_type: MEDIA_TYPE_SCHEMA2_LIST,
            shape: PayloadShape::Index,
        },
        ManifestParser {
            media_type: MEDIA_TYPE_OCI_INDEX,
            shape: PayloadShape::Index,
        },
    ])
});

pub fn parsers() -> &'static ParserRegistry {
    &REGISTRY
}

/// Parse a manifest payload under the media type the client declared.
///
/// When no content type was sent the payload's embedded `mediaType` is used
/// instead, falling back to inference for payloads that omit both. The spec
/// wording requires clients to send the media type, but enough of them do
/// not that rejecting outright would break real pushes.
pub fn parse(
    media_type: Option<&str>,
    bytes: &Bytes,
) -> std::result::Result<ParsedManifest, ManifestError> {
    if let Some(mt) = media_type {
        let mt = mt.split(';').next().unwrap_or(mt).trim();
        return match REGISTRY.get(mt) {
            Some(parser) => parser.parse(bytes),
            None => Err(ManifestError::InvalidPayload(format!(
                "unsupported manifest media type: {mt}"
            ))),
        };
    }

    tracing::debug!("no content type provided for manifest, inspecting payload");
    let embedded = embedded_media_type(bytes)?;
    match embedded {
        Some(mt) => match REGISTRY.get(&mt) {
            Some(parser) => parser.parse(bytes),
            None => Err(ManifestError::InvalidPayload(format!(
                "unsupported manifest media type: {mt}"
            ))),
        },
        None => infer(bytes),
    }
}

fn embedded_media_type(bytes: &Bytes) -> std::result::Result<Option<String>, ManifestError> {
    #[derive(serde::Deserialize)]
    struct MediaTypeOnly {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
    }
    let head: MediaTypeOnly = serde_json::from_slice(bytes)
        .map_err(|e| ManifestError::InvalidPayload(format!("{e}")))?;
    Ok(head.media_type)
}

/// Infer the schema of a payload missing both header and embedded media
/// type, based on the rules in the OCI image manifest specification.
fn infer(bytes: &Bytes) -> std::result::Result<ParsedManifest, ManifestError> {
    if let Ok(im) = serde_json::from_slice::<ImageManifest>(bytes) {
        // Artifacts may use the image manifest shape; a config of EmptyJSON
        // without an artifactType is invalid rather than inferable.
        if im.artifact_type().is_some() || im.config().media_type() == &MediaType::ImageConfig {
            return Ok(ParsedManifest {
                media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
                spec: ManifestSpec::Image(im),
            });
        }
        return Err(ManifestError::InvalidPayload(
            "unable to infer media type for image manifest".to_string(),
        ));
    }
    if let Ok(ii) = serde_json::from_slice::<ImageIndex>(bytes) {
        return Ok(ParsedManifest {
            media_type: MEDIA_TYPE_OCI_INDEX.to_string(),
            spec: ManifestSpec::Index(ii),
        });
    }
    Err(ManifestError::Invalid)
}

#[cfg(test)]
mod test {
    use super::*;

    fn image_manifest_json() -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7",
                "size": 7023
            },
            "layers": [
                {
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": "sha256:9834876dcfb05cb167a5c24953eba58c4ac89b1adf57f28f2f9d09af107ee8f0",
                    "size": 32654
                },
                {
                    "mediaType": "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
                    "digest": "sha256:3c3a4604a545cdc127456d94e421cd355bca5b528f4a9c1905b15da2eb4a4c6b",
                    "size": 73109,
                    "urls": ["https://mirror.example.com/layer"]
                }
            ]
        })
    }

    #[test]
    fn parses_registered_media_type() {
        let bytes = Bytes::from(serde_json::to_vec(&image_manifest_json()).unwrap());
        let parsed = parse(Some(MEDIA_TYPE_SCHEMA2_MANIFEST), &bytes).unwrap();
        assert_eq!(parsed.media_type, MEDIA_TYPE_SCHEMA2_MANIFEST);
        assert!(matches!(parsed.spec, ManifestSpec::Image(_)));
    }

    #[test]
    fn rejects_unregistered_media_type() {
        let bytes = Bytes::from(serde_json::to_vec(&image_manifest_json()).unwrap());
        let err = parse(Some("application/octet-stream"), &bytes).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidPayload(_)));
    }

    #[test]
    fn rejects_malformed_payload() {
        let bytes = Bytes::from_static(b"{\"schemaVersion\": 2");
        let err = parse(Some(MEDIA_TYPE_OCI_MANIFEST), &bytes).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidPayload(_)));
    }

    #[test]
    fn references_flag_foreign_layers() {
        let bytes = Bytes::from(serde_json::to_vec(&image_manifest_json()).unwrap());
        let parsed = parse(Some(MEDIA_TYPE_OCI_MANIFEST), &bytes).unwrap();
        let refs = parsed.references();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].kind, ReferenceKind::Config);
        assert!(refs[0].verifiable);
        assert_eq!(refs[1].kind, ReferenceKind::Layer);
        assert!(refs[1].verifiable);
        assert!(!refs[2].verifiable, "foreign layer must be exempt");
    }

    #[test]
    fn index_parses_and_lists_manifests() {
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": [
                {
                    "mediaType": MEDIA_TYPE_OCI_MANIFEST,
                    "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f",
                    "size": 7143,
                    "platform": { "architecture": "ppc64le", "os": "linux" }
                }
            ]
        });
        let bytes = Bytes::from(serde_json::to_vec(&index).unwrap());
        // media type taken from the payload when the header is missing
        let parsed = parse(None, &bytes).unwrap();
        assert_eq!(parsed.media_type, MEDIA_TYPE_OCI_INDEX);
        let refs = parsed.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, ReferenceKind::Manifest);
    }
}
