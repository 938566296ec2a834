use std::collections::HashMap;
use std::sync::Arc;

pub use string_cache::DefaultAtom as Atom;

/// Decoded RGBA image, shared between the cache and whatever displays it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    pub path: Atom,
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<[u8]>,
}

impl CachedImage {
    pub fn new(path: &str, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            path: Atom::from(path),
            width,
            height,
            rgba: rgba.into(),
        }
    }
}

/// Whether the last component of `path` is `name`, ignoring ASCII case.
pub fn file_name_matches(path: &str, name: &str) -> bool {
    path.rsplit(['/', '\\'])
        .next()
        .is_some_and(|file| file.eq_ignore_ascii_case(name))
}

/// Loaded images and folder listings keyed by interned asset path.
///
/// Filled while assets load online and read back when the content source is
/// unreachable, so a session can start offline from a previous load.
#[derive(Debug, Default)]
pub struct ImageCache {
    images: HashMap<Atom, CachedImage>,
    folders: HashMap<Atom, Vec<Atom>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: CachedImage) {
        self.images.insert(image.path.clone(), image);
    }

    pub fn get(&self, path: &str) -> Option<&CachedImage> {
        self.images.get(&Atom::from(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.images.contains_key(&Atom::from(path))
    }

    /// Image whose file name is `name`, compared case-insensitively. When
    /// several folders hold that name the lowest path wins.
    pub fn find_by_file_name(&self, name: &str) -> Option<&CachedImage> {
        self.images
            .values()
            .filter(|img| file_name_matches(&img.path, name))
            .min_by(|a, b| a.path.cmp(&b.path))
    }

    pub fn remember_folder(&mut self, folder: &str, entries: &[String]) {
        self.folders.insert(
            Atom::from(folder),
            entries.iter().map(|e| Atom::from(e.as_str())).collect(),
        );
    }

    pub fn folder(&self, folder: &str) -> Option<Vec<String>> {
        self.folders
            .get(&Atom::from(folder))
            .map(|entries| entries.iter().map(|a| a.to_string()).collect())
    }

    /// Current count of cached images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
