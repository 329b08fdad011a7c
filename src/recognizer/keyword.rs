use std::path::Path;
use std::sync::Arc;

use crate::error::SessionError;

/// A keyword-spotting model. The blob format belongs to the engine; the
/// session only checks that something loadable was handed over.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordModel {
    keyword: String,
    data: Arc<[u8]>,
}

impl KeywordModel {
    /// Reads a model from disk. The keyword name defaults to the file stem.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| SessionError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let keyword = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        Self::from_bytes(keyword, data)
    }

    pub fn from_bytes(keyword: &str, data: Vec<u8>) -> Result<Self, SessionError> {
        if data.is_empty() {
            return Err(SessionError::ModelLoad(format!(
                "keyword model '{}' is empty",
                keyword
            )));
        }
        Ok(Self {
            keyword: keyword.to_string(),
            data: data.into(),
        })
    }

    pub fn with_keyword(mut self, keyword: &str) -> Self {
        self.keyword = keyword.to_string();
        self
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_defaults_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("computer.table");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let model = KeywordModel::from_file(&path).unwrap();
        assert_eq!(model.keyword(), "computer");
        assert_eq!(model.data(), &[1, 2, 3]);
        assert_eq!(model.with_keyword("Computer").keyword(), "Computer");
    }

    #[test]
    fn empty_and_missing_models_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.table");
        std::fs::write(&path, []).unwrap();

        assert!(matches!(
            KeywordModel::from_file(&path),
            Err(SessionError::ModelLoad(_))
        ));
        assert!(matches!(
            KeywordModel::from_file(dir.path().join("missing.table")),
            Err(SessionError::ModelLoad(_))
        ));
    }
}
