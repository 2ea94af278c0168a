use crate::error::Error;
use crate::netif::InterfaceInfo;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// The name, URL and content behind a message's LOCATION field
///
/// For a scanner, the descriptor is typically constructed from a received
/// LOCATION header and [`content`](LocationDescriptor::content) fetches
/// the device description over HTTP. For a publisher, the URL is usually
/// synthesized from [`name`](LocationDescriptor::name) against the node's
/// description server, and the content comes from wherever the
/// description actually lives (constant bytes, a file, a remote URL).
#[async_trait]
pub trait LocationDescriptor: Send + Sync {
    /// The resource name, used as the URL path component
    fn name(&self) -> &str;

    /// Resolve the LOCATION URL for the given interface
    ///
    /// The default resolves against the node's description server and
    /// fails when the node has no HTTP port.
    ///
    /// # Errors
    ///
    /// [`Error::HttpNotConfigured`] when no HTTP port is available.
    fn location(
        &self,
        http_port: Option<u16>,
        iface: &InterfaceInfo,
    ) -> Result<String, Error> {
        local_url(self.name(), http_port, iface)
    }

    /// Produce the description document bytes
    ///
    /// # Errors
    ///
    /// Whatever the underlying source reports; the node caches a failure
    /// as "missing" and answers 404 thereafter.
    async fn content(&self) -> Result<Vec<u8>, Error>;
}

pub(crate) fn local_url(
    name: &str,
    http_port: Option<u16>,
    iface: &InterfaceInfo,
) -> Result<String, Error> {
    match http_port {
        Some(port) => Ok(format!("http://{}:{}/{}", iface.addr(), port, name)),
        None => Err(Error::HttpNotConfigured(name.to_string())),
    }
}

/// A descriptor whose content is fixed at construction time
pub struct ConstantLocation {
    name: String,
    content: Vec<u8>,
}

impl ConstantLocation {
    /// Wrap constant content under the given resource name
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
impl LocationDescriptor for ConstantLocation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn content(&self) -> Result<Vec<u8>, Error> {
        Ok(self.content.clone())
    }
}

/// A descriptor reading its content from the filesystem
pub struct FileLocation {
    name: String,
    path: PathBuf,
}

impl FileLocation {
    /// Serve the file at `path` under the resource name `name`
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl LocationDescriptor for FileLocation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn content(&self) -> Result<Vec<u8>, Error> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// A descriptor resolving its content via an HTTP URL
///
/// With no explicit name (the scanner case, wrapping a received LOCATION
/// header) the URL itself is the location. With an explicit name (the
/// publisher case) the location resolves against the node's description
/// server as usual while the *content* is fetched from the URL, so a
/// device can republish an externally-hosted description.
pub struct UrlLocation {
    name: Option<String>,
    url: String,
}

impl UrlLocation {
    /// Publish the content behind `url` under the resource name `name`
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            url: url.into(),
        }
    }

    /// Wrap a remote URL as received in a LOCATION header
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
        }
    }

    /// The URL this descriptor fetches content from
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LocationDescriptor for UrlLocation {
    fn name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => self.url.rsplit('/').next().unwrap_or(&self.url),
        }
    }

    fn location(
        &self,
        http_port: Option<u16>,
        iface: &InterfaceInfo,
    ) -> Result<String, Error> {
        match &self.name {
            Some(name) => local_url(name, http_port, iface),
            None => Ok(self.url.clone()),
        }
    }

    async fn content(&self) -> Result<Vec<u8>, Error> {
        let response = reqwest::get(&self.url).await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Select a descriptor for published content by inspecting the string
///
/// A string containing `://` (not at the start) and no newline is treated
/// as a URL; one starting with `<?xml` or containing a newline is inline
/// content; anything else names a file.
pub fn published_location(
    name: &str,
    content: &str,
) -> Arc<dyn LocationDescriptor> {
    let looks_like_url = content.find("://").is_some_and(|p| p > 0)
        && !content.contains('\n');
    if looks_like_url {
        Arc::new(UrlLocation::new(name, content))
    } else if content.starts_with("<?xml") || content.contains('\n') {
        Arc::new(ConstantLocation::new(name, content))
    } else {
        Arc::new(FileLocation::new(name, content))
    }
}

/// A file descriptor using the same string for name and path
pub fn resource_location(name: &str) -> Arc<dyn LocationDescriptor> {
    Arc::new(FileLocation::new(name, name))
}
