pub mod generator;
pub mod policy;
pub mod statement;

pub use generator::DdlGenerator;
pub use policy::PolicyMode;
pub use statement::{Ident, QualifiedName, Statement, MAX_IDENT_LEN};
