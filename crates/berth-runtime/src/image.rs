//! Image resolution: turning an image reference into a launch spec.
//!
//! Pulling and building images is out of scope; resolvers only look up
//! what is already known locally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use berth_common::error::{BerthError, Result};
use berth_common::types::ImageRef;

use crate::isolation::LaunchSpec;

/// Resolves image references to launch specifications.
pub trait ImageResolver: Send + Sync {
    /// Looks up `image`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] with kind `"image"` when unknown.
    fn resolve(&self, image: &ImageRef) -> Result<LaunchSpec>;
}

fn image_not_found(image: &ImageRef) -> BerthError {
    BerthError::NotFound {
        kind: "image",
        id: image.to_string(),
    }
}

/// In-memory resolver populated programmatically.
#[derive(Debug, Default)]
pub struct StaticResolver {
    images: HashMap<ImageRef, LaunchSpec>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec` under `image`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidSpec`] if `image` is not a valid reference.
    pub fn with_image(mut self, image: &str, spec: LaunchSpec) -> Result<Self> {
        let _ = self.images.insert(ImageRef::parse(image)?, spec);
        Ok(self)
    }
}

impl ImageResolver for StaticResolver {
    fn resolve(&self, image: &ImageRef) -> Result<LaunchSpec> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| image_not_found(image))
    }
}

/// Resolver backed by a JSON catalog file mapping references to launch specs:
///
/// ```json
/// { "nginx:alpine": { "command": ["nginx", "-g", "daemon off;"], "env": [["MODE", "prod"]] } }
/// ```
///
/// A missing catalog file is an empty catalog.
#[derive(Debug)]
pub struct CatalogResolver {
    path: PathBuf,
    images: RwLock<HashMap<ImageRef, LaunchSpec>>,
}

impl CatalogResolver {
    /// Loads the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// contains an invalid image reference.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let images = read_catalog(&path)?;
        tracing::info!(path = %path.display(), images = images.len(), "image catalog loaded");
        Ok(Self {
            path,
            images: RwLock::new(images),
        })
    }

    /// Re-reads the catalog file.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogResolver::load`]; the previous catalog stays active on failure.
    pub fn reload(&self) -> Result<()> {
        let images = read_catalog(&self.path)?;
        *self.images.write().unwrap_or_else(PoisonError::into_inner) = images;
        Ok(())
    }
}

fn read_catalog(path: &Path) -> Result<HashMap<ImageRef, LaunchSpec>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| BerthError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw: HashMap<String, LaunchSpec> = serde_json::from_str(&content)?;
    raw.into_iter()
        .map(|(reference, spec)| Ok((ImageRef::parse(&reference)?, spec)))
        .collect()
}

impl ImageResolver for CatalogResolver {
    fn resolve(&self, image: &ImageRef) -> Result<LaunchSpec> {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(image)
            .cloned()
            .ok_or_else(|| image_not_found(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::error::ErrorKind;

    #[test]
    fn static_resolver_matches_normalised_refs() {
        let resolver = StaticResolver::new()
            .with_image(
                "busybox",
                LaunchSpec {
                    command: vec!["sh".into()],
                    ..LaunchSpec::default()
                },
            )
            .expect("register");
        let spec = resolver
            .resolve(&ImageRef::parse("busybox:latest").unwrap())
            .expect("resolve");
        assert_eq!(spec.command, vec!["sh"]);

        let err = resolver
            .resolve(&ImageRef::parse("busybox:1.36").unwrap())
            .expect_err("other tag");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn catalog_loads_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("images.json");
        let resolver = CatalogResolver::load(&path).expect("missing file is empty");
        let nginx = ImageRef::parse("nginx:alpine").unwrap();
        assert!(resolver.resolve(&nginx).is_err());

        std::fs::write(
            &path,
            r#"{"nginx:alpine": {"command": ["nginx", "-g", "daemon off;"], "env": [["MODE", "prod"]]}}"#,
        )
        .expect("write");
        resolver.reload().expect("reload");

        let spec = resolver.resolve(&nginx).expect("resolve");
        assert_eq!(spec.command.len(), 3);
        assert_eq!(spec.env, vec![("MODE".to_string(), "prod".to_string())]);
        assert!(spec.working_dir.is_none());
    }

    #[test]
    fn catalog_rejects_bad_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("images.json");
        std::fs::write(&path, r#"{"Not Valid": {"command": ["x"]}}"#).expect("write");
        assert!(CatalogResolver::load(&path).is_err());
    }
}
