//! Error taxonomy for the object core

use thiserror::Error;

use crate::objects::ObjectId;

/// Errors raised by registry, factory, lifecycle and loader operations
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Template is unknown to the CRC table
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Template passed CRC validation but maps to no object variant
    #[error("no object variant for template: {0}")]
    UnknownVariant(String),

    /// Parent id does not resolve in the registry (transient during loads)
    #[error("object {object_id} references unresolved parent {parent_id}")]
    UnresolvedParent {
        object_id: ObjectId,
        parent_id: ObjectId,
    },

    /// The durable high-water mark could not be read or written
    #[error("object id allocation failed: {0}")]
    AllocationExhausted(#[source] anyhow::Error),

    /// A behavior hook raised an error
    #[error("script {script} failed in {event}: {message}")]
    ScriptHandlerFailure {
        script: String,
        event: String,
        message: String,
    },

    /// A placement row names an id that is already resident
    #[error("duplicate placement for object {0}")]
    DuplicatePlacement(ObjectId),

    /// Cell number outside the building's portal cell range
    #[error("building {building} has no cell slot {cell_number}")]
    InvalidCell { building: ObjectId, cell_number: u32 },

    /// Buildout table with a column layout we do not understand
    #[error("unsupported buildout layout with {columns} columns")]
    UnsupportedLayout { columns: usize },

    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("durable store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("malformed dataset: {0}")]
    Dataset(String),
}

impl ObjectError {
    /// Errors that must halt startup rather than be logged and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, ObjectError::AllocationExhausted(_))
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;
