mod cache;

pub use cache::{Atom, CachedImage, ImageCache, file_name_matches};
