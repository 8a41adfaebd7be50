//! Temporal entity-relation graph.
//!
//! - **store**: arena-backed directed multigraph and its mutation API.
//! - **persist**: node-link JSON load/save.
//! - **visibility**: author/reader spoiler gate.
//! - **query**: prompt-ready context lines for one entity.
//! - **projection**: node/link snapshot for visualisation.

mod persist;
mod projection;
mod query;
mod store;
mod visibility;

pub(crate) use persist::{scalar_text, truthy};
pub use projection::{GraphProjection, LineStyle, NodeCategory, ProjectedLink, ProjectedNode};
pub use query::SECRET_MARKER;
pub use store::{Edge, EdgeId, EdgeView, GraphStats, KnowledgeGraph, NewRelation};
pub use visibility::{ViewerMode, is_visible};
