pub mod hash;
pub mod model;
pub mod naming;
pub mod types;

pub use hash::{compute_hash, hash_prefix};
pub use model::{Column, OnDelete, Relationship, RelationshipType, SchemaDesign, Table};
pub use naming::NamingResolver;
