use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelBuilder;
use crate::error::ConfigError;
use crate::layout::ElementLayout;

/// Serialisable description of a channel's shape.
///
/// ```json
/// { "capacity": 16, "elem_size": 8, "elem_align": 8, "type_tag": "u64" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub capacity: usize,
    pub elem_size: usize,
    pub elem_align: usize,
    pub type_tag: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            elem_size: 8,
            elem_align: 8,
            type_tag: None,
        }
    }
}

impl ChannelConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn layout(&self) -> Result<ElementLayout, ConfigError> {
        Ok(ElementLayout::new(self.elem_size, self.elem_align)?)
    }

    /// Validates the config and returns a builder seeded from it.
    pub fn builder(&self) -> Result<ChannelBuilder, ConfigError> {
        let mut builder = ChannelBuilder::new(self.layout()?).capacity(self.capacity);
        if let Some(tag) = &self.type_tag {
            builder = builder.type_tag(tag.clone());
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::diagnostics::NullSink;
    use crate::error::ChannelError;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = ChannelConfig::from_json_str(r#"{ "capacity": 4 }"#).unwrap();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.elem_size, 8);
        assert_eq!(config.type_tag, None);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = ChannelConfig::from_json_str(r#"{ "capacty": 4 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_bad_layout_is_invalid() {
        let config = ChannelConfig {
            elem_size: 6,
            elem_align: 4,
            ..ChannelConfig::default()
        };
        match config.builder() {
            Err(ConfigError::Invalid(ChannelError::InvalidLayout { size: 6, align: 4 })) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("layout should have been rejected"),
        }
    }

    #[test]
    fn test_builder_carries_shape() {
        let config = ChannelConfig {
            capacity: 3,
            elem_size: 4,
            elem_align: 4,
            type_tag: Some("i32".to_string()),
        };
        let ch = config
            .builder()
            .unwrap()
            .sink(Arc::new(NullSink))
            .build()
            .unwrap();
        assert_eq!(ch.capacity(), 3);
        assert_eq!(ch.layout().size(), 4);
        assert_eq!(ch.type_tag(), "i32");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ChannelConfig::load("/nonexistent/chantools.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chantools.json"));
    }
}
