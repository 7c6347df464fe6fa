//! Name filter for top-level source folders.

/// Prefix of the camera's video recording folders.
pub const MEDIA_FOLDER_PREFIX: &str = "VID_";

/// Prefix of the camera's still capture folders.
pub const CAPTURE_FOLDER_PREFIX: &str = "PIC_";

/// Decides which entries at a source root are copied.
///
/// A name is eligible when it starts with one of the two recognized prefixes
/// (case-sensitive) followed by a non-empty identifier made of ASCII letters,
/// digits, `_` or `-`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathFilter;

impl PathFilter {
    pub const PREFIXES: [&'static str; 2] = [MEDIA_FOLDER_PREFIX, CAPTURE_FOLDER_PREFIX];

    pub fn eligible(&self, name: &str) -> bool {
        Self::PREFIXES.iter().any(|prefix| {
            name.strip_prefix(prefix).is_some_and(|suffix| {
                !suffix.is_empty()
                    && suffix
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_recognized_prefixes() {
        let filter = PathFilter;
        assert!(filter.eligible("PIC_001"));
        assert!(filter.eligible("VID_2023_05_14_10_22_31"));
        assert!(filter.eligible("VID_a1-b2"));
    }

    #[test]
    fn test_rejects_other_names() {
        let filter = PathFilter;
        for name in [
            "notes",
            "DCIM",
            "EVENT",
            ".pro_suc",
            "pic_001",
            "Vid_001",
            "VID_",
            "PIC",
            "VID001",
            "XVID_001",
            " PIC_001",
            "PIC_001 copy",
            "PIC_001/",
            "PIC_ä1",
        ] {
            assert!(!filter.eligible(name), "{name:?} should be rejected");
        }
    }
}
