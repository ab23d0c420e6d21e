// PathMapper maps logical registry entities to driver paths.
//
// The layout in the storage backend is:
//
//	<root>/v2
//	├── blobs
//	│   └── <algorithm>
//	│       └── <first two hex characters of digest>
//	│           └── <full hex digest>
//	│               └── data
//	└── repositories
//	    └── <name>
//	        ├── _layers
//	        │   └── <algorithm>/<hex digest>/link
//	        ├── _manifests
//	        │   ├── revisions
//	        │   │   └── <algorithm>/<hex digest>/link
//	        │   └── tags
//	        │       └── <tag>
//	        │           ├── current/link
//	        │           └── index/<algorithm>/<hex digest>/link
//	        └── _uploads
//	            └── <uuid>
//	                ├── data
//	                ├── startedat
//	                └── hashstate/<algorithm>/<offset>
//
// The content-addressable blob tree holds all bulk data exactly once;
// access to it is controlled through links from repositories into the blob
// tree. The two-character fanout under `blobs` keeps directory sizes
// bounded. This layout is stable: external garbage collection, migration,
// and inspection tooling read it directly.
use uuid::Uuid;

use stevedore_core::{ContentDigest, DigestAlgorithm, RepositoryName};

const DEFAULT_ROOT: &str = "/docker/registry/v2";

#[derive(Clone)]
pub struct PathMapper {
    root: String,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

impl PathMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the content-addressable blob tree,
    /// (e.g. `<root>/blobs`).
    pub fn blobs_path(&self) -> String {
        format!("{}/blobs", self.root)
    }

    /// Directory of a single blob,
    /// (e.g. `<root>/blobs/<algorithm>/<first two hex>/<hex>`).
    pub fn blob_path(&self, digest: &ContentDigest) -> String {
        let hex = digest.encoded();
        format!(
            "{}/{}/{}/{}",
            self.blobs_path(),
            digest.algorithm(),
            &hex[..2],
            hex
        )
    }

    /// Data file of a single blob,
    /// (e.g. `<root>/blobs/<algorithm>/<first two hex>/<hex>/data`).
    pub fn blob_data_path(&self, digest: &ContentDigest) -> String {
        format!("{}/data", self.blob_path(digest))
    }

    /// Root of all repositories,
    /// (e.g. `<root>/repositories`).
    pub fn repositories_path(&self) -> String {
        format!("{}/repositories", self.root)
    }

    /// Root of a single repository,
    /// (e.g. `<root>/repositories/<name>`).
    pub fn repository_path(&self, name: &RepositoryName) -> String {
        format!("{}/{}", self.repositories_path(), name)
    }

    /// Root of a repository's manifest state,
    /// (e.g. `<root>/repositories/<name>/_manifests`).
    pub fn manifests_path(&self, name: &RepositoryName) -> String {
        format!("{}/_manifests", self.repository_path(name))
    }

    /// Root of a repository's manifest revisions,
    /// (e.g. `.../_manifests/revisions`).
    pub fn manifest_revisions_path(&self, name: &RepositoryName) -> String {
        format!("{}/revisions", self.manifests_path(name))
    }

    /// Directory of a single manifest revision,
    /// (e.g. `.../_manifests/revisions/<algorithm>/<hex>`).
    pub fn manifest_revision_path(&self, name: &RepositoryName, digest: &ContentDigest) -> String {
        format!(
            "{}/{}/{}",
            self.manifest_revisions_path(name),
            digest.algorithm(),
            digest.encoded()
        )
    }

    /// Link file of a single manifest revision,
    /// (e.g. `.../_manifests/revisions/<algorithm>/<hex>/link`).
    pub fn manifest_revision_link_path(
        &self,
        name: &RepositoryName,
        digest: &ContentDigest,
    ) -> String {
        format!("{}/link", self.manifest_revision_path(name, digest))
    }

    /// Root of a repository's tags,
    /// (e.g. `.../_manifests/tags`).
    pub fn tags_path(&self, name: &RepositoryName) -> String {
        format!("{}/tags", self.manifests_path(name))
    }

    /// Directory of a single tag,
    /// (e.g. `.../_manifests/tags/<tag>`).
    pub fn tag_path(&self, name: &RepositoryName, tag: &str) -> String {
        format!("{}/{}", self.tags_path(name), tag)
    }

    /// Link file holding a tag's current digest,
    /// (e.g. `.../_manifests/tags/<tag>/current/link`).
    pub fn tag_current_link_path(&self, name: &RepositoryName, tag: &str) -> String {
        format!("{}/current/link", self.tag_path(name, tag))
    }

    /// Root of a tag's history index,
    /// (e.g. `.../_manifests/tags/<tag>/index`).
    pub fn tag_index_path(&self, name: &RepositoryName, tag: &str) -> String {
        format!("{}/index", self.tag_path(name, tag))
    }

    /// History entry link for one digest a tag has pointed to,
    /// (e.g. `.../_manifests/tags/<tag>/index/<algorithm>/<hex>/link`).
    pub fn tag_index_entry_link_path(
        &self,
        name: &RepositoryName,
        tag: &str,
        digest: &ContentDigest,
    ) -> String {
        format!(
            "{}/{}/{}/link",
            self.tag_index_path(name, tag),
            digest.algorithm(),
            digest.encoded()
        )
    }

    /// Root of a repository's blob links,
    /// (e.g. `<root>/repositories/<name>/_layers`).
    pub fn layers_path(&self, name: &RepositoryName) -> String {
        format!("{}/_layers", self.repository_path(name))
    }

    /// Link file expressing a repository's membership of a blob,
    /// (e.g. `.../_layers/<algorithm>/<hex>/link`).
    pub fn layer_link_path(&self, name: &RepositoryName, digest: &ContentDigest) -> String {
        format!(
            "{}/{}/{}/link",
            self.layers_path(name),
            digest.algorithm(),
            digest.encoded()
        )
    }

    /// Root of a repository's upload sessions,
    /// (e.g. `<root>/repositories/<name>/_uploads`).
    pub fn uploads_path(&self, name: &RepositoryName) -> String {
        format!("{}/_uploads", self.repository_path(name))
    }

    /// Directory of a single upload session,
    /// (e.g. `.../_uploads/<uuid>`).
    pub fn upload_path(&self, name: &RepositoryName, uuid: &Uuid) -> String {
        format!("{}/{}", self.uploads_path(name), uuid)
    }

    /// Data file of a single upload session,
    /// (e.g. `.../_uploads/<uuid>/data`).
    pub fn upload_data_path(&self, name: &RepositoryName, uuid: &Uuid) -> String {
        format!("{}/data", self.upload_path(name, uuid))
    }

    /// Start-time marker of a single upload session,
    /// (e.g. `.../_uploads/<uuid>/startedat`).
    pub fn upload_started_at_path(&self, name: &RepositoryName, uuid: &Uuid) -> String {
        format!("{}/startedat", self.upload_path(name, uuid))
    }

    /// Digest checkpoint of a single upload session,
    /// (e.g. `.../_uploads/<uuid>/hashstate/<algorithm>/<offset>`).
    pub fn upload_hashstate_path(
        &self,
        name: &RepositoryName,
        uuid: &Uuid,
        algorithm: DigestAlgorithm,
        offset: u64,
    ) -> String {
        format!(
            "{}/hashstate/{}/{}",
            self.upload_path(name, uuid),
            algorithm,
            offset
        )
    }

    /// Root of a session's digest checkpoints,
    /// (e.g. `.../_uploads/<uuid>/hashstate`).
    pub fn upload_hashstates_path(&self, name: &RepositoryName, uuid: &Uuid) -> String {
        format!("{}/hashstate", self.upload_path(name, uuid))
    }
}
