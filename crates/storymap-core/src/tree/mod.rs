//! Story map tree construction
//!
//! Turns flat Bitable rows into a single rooted tree keyed by a configurable
//! identifier field. See [`TreeBuilder`] for the validation rules.

pub mod builder;
pub mod node;
pub mod record;

pub use builder::{BuildReport, FetchSummary, Rejection, RejectionReason, TreeBuilder};
pub use node::{PreOrder, TreeNode, TreeStats, ROOT_ID};
pub use record::{extract_text, FieldMapping, FlatRecord, IdFormat, RECORD_ID_FIELD};
