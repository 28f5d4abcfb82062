use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("Invalid header space: {0}")]
    InvalidHeaderSpace(String),
    #[error("Cannot parse IP value `{0}`")]
    ParseIp(String),
    #[error("Expression must be resolved against a node before this step: {0}")]
    UnresolvedExpr(String),
    #[error("Unknown ACL `{0}`")]
    UnknownAcl(String),
    #[error("ACL reference cycle through `{0}`")]
    AclCycle(String),
    #[error("Field {field} has no width in this layout")]
    FieldWidth { field: String },
}
