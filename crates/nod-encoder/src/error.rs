use nod_ir::IrError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("Unsupported construct: {0}")]
    Unsupported(String),
    #[error("Ingress location {0} is not enabled")]
    UnknownIngress(String),
    #[error("Unknown node `{0}`")]
    UnknownNode(String),
    #[error("Invalid snapshot: {0}")]
    Invalid(String),
}
