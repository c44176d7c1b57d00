//! Application settings, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// How the client window id travels between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientWindowMode {
    None,
    #[default]
    Url,
    Client,
}

/// ```toml
/// client-window-mode = "url"
/// flow-definitions = "flows"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FacesSettings {
    pub client_window_mode: ClientWindowMode,
    /// Directory scanned for `<name>/<name>-flow.json` documents.
    pub flow_definitions: Option<PathBuf>,
}

impl FacesSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, FlowError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path).map_err(|source| FlowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = FacesSettings::from_toml_str("").unwrap();
        assert_eq!(settings.client_window_mode, ClientWindowMode::Url);
        assert!(settings.flow_definitions.is_none());
    }

    #[test]
    fn kebab_case_keys() {
        let settings = FacesSettings::from_toml_str(
            "client-window-mode = \"none\"\nflow-definitions = \"web/flows\"\n",
        )
        .unwrap();
        assert_eq!(settings.client_window_mode, ClientWindowMode::None);
        assert_eq!(settings.flow_definitions, Some(PathBuf::from("web/flows")));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = FacesSettings::from_toml_str("client-window-mode = \"tab\"").unwrap_err();
        assert!(matches!(err, FlowError::Settings(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client-window-mode = \"client\"").unwrap();
        let settings = FacesSettings::load(file.path()).unwrap();
        assert_eq!(settings.client_window_mode, ClientWindowMode::Client);

        let missing = FacesSettings::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(FlowError::Io { .. })));
    }
}
