#![doc = include_str!("../README.md")]

pub mod compose;
pub mod error;
pub mod fib;
pub mod input;
pub mod instrument;
pub mod query;
pub mod snapshot;
pub mod transitions;
pub mod zones;

pub use compose::{encode_query, EncodedQuery};
pub use error::EncoderError;
pub use input::{Disabled, SynthesizerInput};
pub use query::{IngressLocation, QueryProgram, QuerySynthesizer, SrcNatConstraint};
pub use snapshot::Snapshot;
