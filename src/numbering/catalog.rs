use std::collections::HashMap;

use serde::Serialize;

use crate::contracts::ValidationError;
use crate::numbering::key::{TypeKey, SHARED_SERIES};

/// Labels accepted out of the box.
pub const DEFAULT_DOCUMENT_TYPES: [&str; 9] = [
    "Oficio",
    "Protocolo",
    "Despacho",
    "Ordem de Missao",
    "Relatorio Policial",
    "Verificacao de Procedencia de Informacao - VPI",
    "Carta Precatoria Expedida",
    "Carta Precatoria Recebida",
    "Intimacao",
];

/// A known document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentType {
    pub label: String,
    pub key: TypeKey,
}

/// Allow-list of document types.
///
/// Only keys registered here ever reach the sequence registry. Two labels
/// that normalize to the same key are rejected at construction.
#[derive(Debug, Clone)]
pub struct DocumentTypeCatalog {
    types: Vec<DocumentType>,
    by_key: HashMap<TypeKey, usize>,
}

impl Default for DocumentTypeCatalog {
    fn default() -> Self {
        // The built-in labels are distinct after normalization.
        Self::from_labels(DEFAULT_DOCUMENT_TYPES).unwrap_or_else(|_| Self::empty())
    }
}

impl DocumentTypeCatalog {
    fn empty() -> Self {
        Self {
            types: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn from_labels<I, S>(labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::empty();
        for label in labels {
            catalog.register(label.as_ref())?;
        }
        Ok(catalog)
    }

    /// Built-in labels plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::from_labels(DEFAULT_DOCUMENT_TYPES)?;
        for label in extra {
            catalog.register(label.as_ref())?;
        }
        Ok(catalog)
    }

    fn register(&mut self, label: &str) -> Result<(), ValidationError> {
        let label = label.trim();
        let key = TypeKey::from_label(label)?;
        if key.as_str() == SHARED_SERIES {
            return Err(ValidationError::InvalidTypeKey(label.to_string()));
        }
        if let Some(&existing) = self.by_key.get(&key) {
            return Err(ValidationError::DuplicateTypeKey {
                key: key.to_string(),
                first: self.types[existing].label.clone(),
                second: label.to_string(),
            });
        }
        self.by_key.insert(key.clone(), self.types.len());
        self.types.push(DocumentType {
            label: label.to_string(),
            key,
        });
        Ok(())
    }

    /// Resolves free text to a known type. Accent, case and separator
    /// differences are ignored.
    pub fn resolve(&self, raw: &str) -> Result<&DocumentType, ValidationError> {
        let unknown = || ValidationError::UnknownDocumentType(raw.to_string());
        let key = TypeKey::from_label(raw).map_err(|_| unknown())?;
        self.by_key
            .get(&key)
            .map(|&idx| &self.types[idx])
            .ok_or_else(unknown)
    }

    pub fn types(&self) -> &[DocumentType] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
