use serde::{Deserialize, Serialize};

/// Recognized model options. `parse` is deliberately forgiving of
/// hyphen/underscore variants since this value round-trips through env vars
/// and JSON event envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelName {
    FastMultimodal,
    ProMultimodal,
    ImageEditing,
    Embedding,
}

impl ModelName {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().replace('_', "-").as_str() {
            "fast-multimodal" => Some(Self::FastMultimodal),
            "pro-multimodal" => Some(Self::ProMultimodal),
            "image-editing" => Some(Self::ImageEditing),
            "embedding" => Some(Self::Embedding),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastMultimodal => "fast-multimodal",
            Self::ProMultimodal => "pro-multimodal",
            Self::ImageEditing => "image-editing",
            Self::Embedding => "embedding",
        }
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_and_snake_case() {
        assert_eq!(ModelName::parse("fast-multimodal"), Some(ModelName::FastMultimodal));
        assert_eq!(ModelName::parse("fast_multimodal"), Some(ModelName::FastMultimodal));
        assert_eq!(ModelName::parse("FAST-MULTIMODAL"), Some(ModelName::FastMultimodal));
        assert_eq!(ModelName::parse("nonsense"), None);
    }
}
