//! Filesystem-backed resource store.
//!
//! Resources live under a root directory. A resource path maps to the file
//! of the same name, falling back to `<path>.md`. Optional attributes are
//! read from a `<file>.meta.toml` sidecar:
//!
//! ```toml
//! output = "source"
//! mime = "text/x-markdown"
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::domain::resource::normalize_path;
use crate::domain::{Resource, ResourceError, ResourceStore};

const SIDECAR_SUFFIX: &str = ".meta.toml";
const MARKDOWN_MIME: &str = "text/markdown";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Sidecar {
    output: Option<String>,
    mime: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FsResourceStore {
    root: PathBuf,
}

impl FsResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, path: &str) -> Result<Option<PathBuf>, ResourceError> {
        let exact = self.root.join(path);
        let candidates = [exact.clone(), append_extension(&exact, "md")];
        for candidate in candidates {
            match std::fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() => return Ok(Some(candidate)),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ResourceError::io(path, err)),
            }
        }
        Ok(None)
    }

    fn read_sidecar(&self, path: &str, file: &Path) -> Result<Sidecar, ResourceError> {
        let sidecar = append_extension(file, SIDECAR_SUFFIX.trim_start_matches('.'));
        let raw = match std::fs::read_to_string(&sidecar) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Sidecar::default()),
            Err(err) => return Err(ResourceError::io(path, err)),
        };
        toml::from_str(&raw).map_err(|err| ResourceError::metadata(path, err.to_string()))
    }
}

impl ResourceStore for FsResourceStore {
    fn find(&self, path: &str) -> Result<Arc<Resource>, ResourceError> {
        let path = validate_path(path)?;
        if path.ends_with(SIDECAR_SUFFIX) {
            return Err(ResourceError::not_found(path));
        }

        let Some(file) = self.locate(&path)? else {
            return Err(ResourceError::not_found(path));
        };
        let content = std::fs::read(&file).map_err(|err| ResourceError::io(&path, err))?;
        let sidecar = self.read_sidecar(&path, &file)?;

        let mime = match sidecar.mime {
            Some(mime) if !mime.trim().is_empty() => mime.trim().to_string(),
            _ => detect_mime(&file, &content),
        };
        let mut resource = Resource::new(path.as_str(), mime, content);
        if let Some(output) = sidecar.output {
            resource = resource.with_output(output);
        }

        debug!(
            op = "find",
            path = %path,
            mime = resource.mime(),
            version = resource.version().cache_id(),
            "resource loaded"
        );
        Ok(Arc::new(resource))
    }
}

fn validate_path(path: &str) -> Result<String, ResourceError> {
    let normalized = normalize_path(path);
    if normalized.is_empty() {
        return Err(ResourceError::invalid_path(path, "path is empty"));
    }
    if normalized
        .split('/')
        .any(|segment| segment == ".." || segment.contains('\\'))
    {
        return Err(ResourceError::invalid_path(
            path,
            "path must stay inside the content root",
        ));
    }
    Ok(normalized)
}

fn append_extension(file: &Path, extension: &str) -> PathBuf {
    let mut raw = file.as_os_str().to_os_string();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

fn detect_mime(file: &Path, content: &[u8]) -> String {
    match file.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") => {
            MARKDOWN_MIME.to_string()
        }
        Some(_) => mime_guess::from_path(file)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        None if std::str::from_utf8(content).is_ok() => MARKDOWN_MIME.to_string(),
        None => OCTET_STREAM.to_string(),
    }
}
