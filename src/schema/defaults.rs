//! Default and reserved field sets
//!
//! Default fields exist on every document of their shape and may never be
//! excluded; private fields (leading underscore) are reserved for internal
//! use and may not be selected or excluded by name.

use crate::schema::MediaType;
use std::collections::BTreeSet;

/// Reserved path prefix marking frame scope on video collections
pub const FRAMES_PREFIX: &str = "frames.";

/// The default sample-level fields for the given media type
pub fn default_sample_paths(media_type: MediaType) -> BTreeSet<&'static str> {
    let mut paths: BTreeSet<&'static str> =
        ["_id", "filepath", "tags", "metadata", "_rand"].into_iter().collect();

    if media_type == MediaType::Video {
        paths.insert("frames");
    }

    paths
}

/// The default frame-level fields
pub fn default_frame_paths() -> BTreeSet<&'static str> {
    ["_id", "frame_number"].into_iter().collect()
}

/// Whether a field name is reserved for internal use
pub fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_defaults_include_frames() {
        assert!(default_sample_paths(MediaType::Video).contains("frames"));
        assert!(!default_sample_paths(MediaType::Image).contains("frames"));
    }

    #[test]
    fn test_required_fields_present() {
        let paths = default_sample_paths(MediaType::Image);
        assert!(paths.contains("filepath"));
        assert!(paths.contains("_id"));
        assert!(paths.contains("_rand"));

        let frame_paths = default_frame_paths();
        assert!(frame_paths.contains("frame_number"));
    }

    #[test]
    fn test_private_names() {
        assert!(is_private("_rand"));
        assert!(is_private("_id"));
        assert!(!is_private("filepath"));
    }
}
