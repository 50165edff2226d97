//! Static file fallback
//!
//! Requests that match no route are resolved under the document root.
//! The root never changes after startup; media types come from the
//! file suffix via `mime_guess`.

use crate::http::ErrorKind;
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Static file lookup failures
#[derive(Debug, thiserror::Error)]
pub enum StaticError {
    #[error("Not found")]
    NotFound,

    #[error("Access denied")]
    NoAccess,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StaticError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StaticError::NotFound => ErrorKind::NotFound,
            StaticError::NoAccess => ErrorKind::NoAccess,
            StaticError::Io(_) => ErrorKind::Internal,
        }
    }

    fn from_open(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StaticError::NotFound,
            io::ErrorKind::PermissionDenied => StaticError::NoAccess,
            // a decoded path that is not a valid file name (embedded NUL)
            io::ErrorKind::InvalidInput => StaticError::NotFound,
            _ => StaticError::Io(err),
        }
    }
}

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Media type for `path` by its suffix
pub fn mime_type(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// The configured document root
#[derive(Debug, Clone)]
pub struct DocRoot {
    root: PathBuf,
}

impl DocRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DocRoot { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a decoded request path to a file under the root
    ///
    /// A trailing `/` names the directory's `index.html`. Any `..`
    /// segment is refused.
    pub fn resolve(&self, url_path: &str) -> Result<PathBuf, StaticError> {
        let mut path = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(StaticError::NoAccess),
            }
        }
        if url_path.is_empty() || url_path.ends_with('/') {
            path.push("index.html");
        }
        Ok(path)
    }

    /// Stream the file for `url_path` into `body`; returns its media type
    pub fn serve(&self, url_path: &str, body: &mut BytesMut) -> Result<&'static str, StaticError> {
        let path = self.resolve(url_path)?;
        let mut file = File::open(&path).map_err(StaticError::from_open)?;

        let meta = file.metadata()?;
        if meta.is_dir() {
            return Err(StaticError::NotFound);
        }

        body.reserve(meta.len() as usize);
        io::copy(&mut file, &mut body.writer())?;
        Ok(mime_type(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a/index.html")), "text/html");
        assert_eq!(mime_type(Path::new("logo.PNG")), "image/png");
        assert_eq!(mime_type(Path::new("report.csv")), "text/csv");
        assert_eq!(mime_type(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(mime_type(Path::new("blob.zzqx")), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type(Path::new("README")), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_resolve() {
        let root = DocRoot::new("/srv/www");
        assert_eq!(root.resolve("/").unwrap(), PathBuf::from("/srv/www/index.html"));
        assert_eq!(
            root.resolve("/docs/").unwrap(),
            PathBuf::from("/srv/www/docs/index.html")
        );
        assert_eq!(
            root.resolve("/a/./b.txt").unwrap(),
            PathBuf::from("/srv/www/a/b.txt")
        );
        assert!(matches!(root.resolve("/../etc/passwd"), Err(StaticError::NoAccess)));
        assert!(matches!(root.resolve("/a/../../x"), Err(StaticError::NoAccess)));
    }

    #[test]
    fn test_serve() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(dir.path().join("data.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let root = DocRoot::new(dir.path());

        let mut body = BytesMut::new();
        assert_eq!(root.serve("/", &mut body).unwrap(), "text/html");
        assert_eq!(&body[..], b"<h1>hi</h1>");

        body.clear();
        assert_eq!(root.serve("/data.json", &mut body).unwrap(), "application/json");
        assert_eq!(&body[..], b"{}");

        assert!(matches!(root.serve("/missing", &mut body), Err(StaticError::NotFound)));
        assert!(matches!(root.serve("/sub", &mut body), Err(StaticError::NotFound)));
        assert!(matches!(root.serve("/a\0b", &mut body), Err(StaticError::NotFound)));
        assert_eq!(
            root.serve("/../x", &mut body).unwrap_err().kind(),
            ErrorKind::NoAccess
        );
    }
}
