//! OCI image layout as produced by `docker save`.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{PublishError, Result};
use super::reference::ImageReference;

const ANNOTATION_IMAGE_NAME: &str = "io.containerd.image.name";
const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

const INDEX_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Descriptor {
    pub fn is_index(&self) -> bool {
        INDEX_MEDIA_TYPES.contains(&self.media_type.as_str())
    }

    pub fn is_manifest(&self) -> bool {
        self.is_index() || MANIFEST_MEDIA_TYPES.contains(&self.media_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Index {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    config: Descriptor,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

/// An unpacked image layout directory.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Unpacks an image tarball into `dest`.
    pub fn unpack(tarball: &Path, dest: &Path) -> Result<Self> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PublishError::Io { path, source }
        };

        let file = File::open(tarball).map_err(io_err(tarball))?;
        std::fs::create_dir_all(dest).map_err(io_err(dest))?;
        tar::Archive::new(file)
            .unpack(dest)
            .map_err(io_err(tarball))?;

        Self::open(dest)
    }

    pub fn open(root: &Path) -> Result<Self> {
        if !root.join("index.json").is_file() {
            return Err(PublishError::Layout(format!(
                "{} has no index.json (container engine too old to export OCI layouts?)",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Top-level descriptors of `index.json`.
    pub fn index(&self) -> Result<Vec<Descriptor>> {
        let path = self.root.join("index.json");
        let content = std::fs::read(&path).map_err(|source| PublishError::Io {
            path: path.clone(),
            source,
        })?;
        let index: Index = serde_json::from_slice(&content)
            .map_err(|e| PublishError::Layout(format!("invalid index.json: {}", e)))?;
        Ok(index.manifests)
    }

    /// The top-level manifest of `image`: matched by annotation, or the only one.
    pub fn select(&self, image: &ImageReference) -> Result<Descriptor> {
        let index = self.index()?;
        select_manifest(index, image)
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| PublishError::Layout(format!("malformed digest {}", digest)))?;

        let valid = !algorithm.is_empty()
            && !hex.is_empty()
            && algorithm.chars().all(|c| c.is_ascii_alphanumeric())
            && hex.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(PublishError::Layout(format!("malformed digest {}", digest)));
        }

        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    pub async fn read_blob(&self, digest: &str) -> Result<Bytes> {
        let path = self.blob_path(digest)?;
        let content = tokio::fs::read(&path)
            .await
            .map_err(|source| PublishError::Io { path, source })?;
        Ok(Bytes::from(content))
    }
}

pub(crate) fn select_manifest(mut index: Vec<Descriptor>, image: &ImageReference) -> Result<Descriptor> {
    let full_name = image.to_string();

    let matched = index.iter().find(|d| {
        d.annotations.get(ANNOTATION_IMAGE_NAME) == Some(&full_name)
            || d.annotations.get(ANNOTATION_REF_NAME) == Some(&image.tag)
    });

    if let Some(desc) = matched {
        return Ok(desc.clone());
    }

    match index.len() {
        1 => Ok(index.remove(0)),
        0 => Err(PublishError::Layout(
            "index.json lists no manifests".to_string(),
        )),
        n => Err(PublishError::Layout(format!(
            "index.json lists {} manifests, none for {}",
            n, full_name
        ))),
    }
}

/// Descriptors referenced by a manifest or index blob.
pub fn children(desc: &Descriptor, content: &[u8]) -> Result<Vec<Descriptor>> {
    let invalid = |e: serde_json::Error| {
        PublishError::Layout(format!("invalid manifest {}: {}", desc.digest, e))
    };

    if desc.is_index() {
        let index: Index = serde_json::from_slice(content).map_err(invalid)?;
        return Ok(index.manifests);
    }

    let manifest: Manifest = serde_json::from_slice(content).map_err(invalid)?;
    let mut children = Vec::with_capacity(manifest.layers.len() + 1);
    children.push(manifest.config);
    children.extend(manifest.layers);
    Ok(children)
}
