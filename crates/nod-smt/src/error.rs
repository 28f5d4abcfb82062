use nod_ir::IrError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmtError {
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Negated program `{program}` transforms field {field}; negation needs a transform-free program")]
    UnsupportedNegation { program: String, field: String },
    #[error("Unknown relation `{0}`")]
    UnknownRelation(String),
    #[error("Header constraint mentions transformed field {0}")]
    FieldTransformedInHeaderConstraint(String),
    #[error("Width mismatch in `{0}`")]
    WidthMismatch(String),
    #[error(transparent)]
    Ir(#[from] IrError),
}
