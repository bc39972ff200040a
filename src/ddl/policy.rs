use super::statement::{Ident, OrgMatch, PolicyOp, QualifiedName, Statement};
use crate::error::SyncResult;

/// How generated policies identify the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PolicyMode {
    /// Compare against the namespace accessor function. Policy text is the
    /// same for every tenant; used by the change applier.
    #[default]
    Accessor,
    /// Embed the organization id literally. Only for bulk provisioning.
    Literal(String),
}

/// The four row-level policies (SELECT/INSERT/UPDATE/DELETE) of a table.
pub fn tenant_policies(table: &QualifiedName, mode: &PolicyMode) -> SyncResult<Vec<Statement>> {
    let org = match mode {
        PolicyMode::Accessor => OrgMatch::Accessor(table.namespace.clone()),
        PolicyMode::Literal(org_id) => OrgMatch::Literal(org_id.clone()),
    };

    PolicyOp::ALL
        .iter()
        .map(|op| {
            Ok(Statement::CreatePolicy {
                table: table.clone(),
                name: Ident::derived(&[table.name.as_str(), op.suffix(), "org"])?,
                op: *op,
                org: org.clone(),
            })
        })
        .collect()
}
