//! Resource handle lifecycle
//!
//! Embedded media extracted from the archive is handed to a
//! [`ResourceStore`], which returns a locally-dereferenceable URL. Every
//! handle registered during a load is owned by a [`ResourceHandles`] guard
//! and released when the guard is dropped, whether the load finished,
//! failed or was abandoned.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A registered resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Store-unique id
    pub id: u64,
    /// URL the renderer should use in place of the archive path
    pub url: String,
    /// Archive path the bytes came from
    pub path: String,
    /// MIME type
    pub media_type: String,
}

/// Host capability that turns bytes into a URL (object URLs, a cache
/// directory, an in-memory map).
pub trait ResourceStore: Send + Sync {
    /// Store `bytes` and return a handle for them.
    fn register(&self, path: &str, media_type: &str, bytes: Vec<u8>) -> ResourceHandle;

    /// Forget a handle; its URL stops resolving.
    fn release(&self, handle: &ResourceHandle);
}

/// Bytes kept by [`MemoryResourceStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredResource {
    /// MIME type
    pub media_type: String,
    /// Raw bytes
    pub bytes: Vec<u8>,
}

/// In-process store handing out `blob:foxel/<n>` URLs.
#[derive(Default)]
pub struct MemoryResourceStore {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, StoredResource>>,
}

impl fmt::Debug for MemoryResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResourceStore")
            .field("live", &self.len())
            .finish()
    }
}

/// URL prefix used by [`MemoryResourceStore`]
pub const BLOB_URL_PREFIX: &str = "blob:foxel/";

impl MemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes behind a URL, if still registered.
    pub fn get(&self, url: &str) -> Option<StoredResource> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceStore for MemoryResourceStore {
    fn register(&self, path: &str, media_type: &str, bytes: Vec<u8>) -> ResourceHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{}{}", BLOB_URL_PREFIX, id);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                url.clone(),
                StoredResource {
                    media_type: media_type.to_string(),
                    bytes,
                },
            );
        ResourceHandle {
            id,
            url,
            path: path.to_string(),
            media_type: media_type.to_string(),
        }
    }

    fn release(&self, handle: &ResourceHandle) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.url);
    }
}

/// Handles created by one load session; released on drop.
pub struct ResourceHandles {
    store: Arc<dyn ResourceStore>,
    handles: Vec<ResourceHandle>,
}

impl fmt::Debug for ResourceHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandles")
            .field("handles", &self.handles)
            .finish()
    }
}

impl ResourceHandles {
    /// Empty handle list bound to `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            handles: Vec::new(),
        }
    }

    /// Register bytes with the store and keep the handle.
    pub fn register(&mut self, path: &str, media_type: &str, bytes: Vec<u8>) -> &ResourceHandle {
        let handle = self.store.register(path, media_type, bytes);
        let idx = self.handles.len();
        self.handles.push(handle);
        &self.handles[idx]
    }

    /// URL already registered for an archive path.
    pub fn url_for(&self, path: &str) -> Option<&str> {
        self.handles
            .iter()
            .find(|h| h.path == path)
            .map(|h| h.url.as_str())
    }

    /// Live handles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release every handle now.
    pub fn release_all(&mut self) {
        for handle in self.handles.drain(..) {
            self.store.release(&handle);
        }
    }
}

impl Drop for ResourceHandles {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            log::debug!("[RES] Releasing {} resource handles", self.handles.len());
        }
        self.release_all();
    }
}

/// MIME type from a file extension.
pub fn guess_mime_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" | "xhtml" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "mp4" | "m4v" => "video/mp4",
        "ogg" => "audio/ogg",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}
