use crate::definition::InputDeclaration;
use crate::media::decode_payload;
use agentflow_core::{DocumentExtractor, ExtractionError, ExtractionErrorKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A file payload ready for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFile {
    /// Passed through for multimodal injection.
    Image { mime_type: String, data: String },
    /// Decoded or extracted text standing in for the file.
    Text { mime_type: String, text: String },
}

/// Caller input partitioned into plain variables and file payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputs {
    pub variables: BTreeMap<String, String>,
    pub files: BTreeMap<String, Vec<ResolvedFile>>,
    pub errors: Vec<ExtractionError>,
}

impl ResolvedInputs {
    pub fn is_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}

/// Partitions validated input by declaration kind and extracts file content.
#[derive(Clone)]
pub struct VariableResolver {
    extractor: Option<Arc<dyn DocumentExtractor>>,
    extract_documents: bool,
}

impl VariableResolver {
    pub fn new() -> Self {
        Self {
            extractor: None,
            extract_documents: true,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Toggles hand-off of non-image, non-text payloads to the extractor.
    pub fn with_document_extraction(mut self, enabled: bool) -> Self {
        self.extract_documents = enabled;
        self
    }

    #[tracing::instrument(level = "debug", skip_all, fields(declared = declarations.len()))]
    pub async fn resolve(
        &self,
        declarations: &[InputDeclaration],
        input: &Value,
    ) -> ResolvedInputs {
        let mut resolved = ResolvedInputs::default();

        for decl in declarations {
            let value = match input.get(&decl.name) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            if !decl.kind.is_file() {
                resolved
                    .variables
                    .insert(decl.name.clone(), stringify_scalar(value));
                continue;
            }

            let payloads: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };

            let mut files = Vec::with_capacity(payloads.len());
            for payload in payloads {
                match self.resolve_file(&decl.name, payload).await {
                    Ok(file) => files.push(file),
                    Err(err) => {
                        tracing::warn!(input = %decl.name, error = %err, "file input dropped");
                        resolved.errors.push(err);
                    }
                }
            }
            if !files.is_empty() {
                resolved.files.insert(decl.name.clone(), files);
            }
        }

        tracing::debug!(
            variables = resolved.variables.len(),
            files = resolved.files.len(),
            errors = resolved.errors.len(),
            "inputs resolved"
        );
        resolved
    }

    async fn resolve_file(
        &self,
        input: &str,
        payload: &str,
    ) -> Result<ResolvedFile, ExtractionError> {
        let decoded = decode_payload(payload)
            .map_err(|reason| ExtractionError::new(input, ExtractionErrorKind::Decode(reason)))?;

        if decoded.is_image() {
            return Ok(ResolvedFile::Image {
                mime_type: decoded.mime_type,
                data: decoded.base64,
            });
        }

        if decoded.is_text() {
            let text = String::from_utf8(decoded.bytes).map_err(|e| {
                ExtractionError::new(input, ExtractionErrorKind::Decode(e.to_string()))
            })?;
            return Ok(ResolvedFile::Text {
                mime_type: decoded.mime_type,
                text,
            });
        }

        match &self.extractor {
            Some(extractor) if self.extract_documents => {
                let text = extractor
                    .extract(&decoded.mime_type, &decoded.bytes)
                    .await
                    .map_err(|e| {
                        ExtractionError::new(input, ExtractionErrorKind::Failed(e.to_string()))
                    })?;
                Ok(ResolvedFile::Text {
                    mime_type: decoded.mime_type,
                    text,
                })
            }
            _ => Err(ExtractionError::new(
                input,
                ExtractionErrorKind::Unsupported(decoded.mime_type),
            )),
        }
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
