pub mod entity;
pub mod request;

pub use entity::{EntitySchema, FieldSpec, FieldValidator};
pub use request::{CandidateRequest, FieldMap, OperationKind, OperationRequest, Reference};
