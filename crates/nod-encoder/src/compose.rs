//! Putting a query on top of the transitions of one input.

use nod_ir::program::{Polarity, Program};
use tracing::debug;

use crate::error::EncoderError;
use crate::input::SynthesizerInput;
use crate::instrument::{IngressLocationInstrumentation, TransitNodesInstrumentation};
use crate::query::QuerySynthesizer;
use crate::transitions::generate_transitions;

/// A complete program for one question, ready for assembly.
#[derive(Debug, Clone)]
pub struct EncodedQuery {
    pub program: Program,
    pub polarity: Polarity,
    /// Decodes `INGRESS_LOCATION`; absent when the query originates nowhere.
    pub ingress: Option<IngressLocationInstrumentation>,
    pub description: String,
}

pub fn encode_query(
    input: &SynthesizerInput,
    query: &dyn QuerySynthesizer,
) -> Result<EncodedQuery, EncoderError> {
    let description = query.describe();
    let synthesized = query.synthesize(input)?;

    let mut program = Program::new(input.layout().clone())
        .with_rules(generate_transitions(input))
        .with_rules(synthesized.rules)
        .with_queries(synthesized.queries);

    let ingress = (!synthesized.ingress.is_empty())
        .then(|| IngressLocationInstrumentation::new(synthesized.ingress));
    if let Some(instrumentation) = &ingress {
        instrumentation.apply(&mut program);
    }
    TransitNodesInstrumentation {
        required: synthesized.transit_nodes,
        forbidden: synthesized.non_transit_nodes,
    }
    .apply(&mut program);

    let polarity = if synthesized.negate {
        Polarity::Negated
    } else {
        Polarity::Positive
    };
    debug!(
        query = %description,
        rules = program.rules.len(),
        fields = program.layout.len(),
        negated = synthesized.negate,
        "NoD: encoded query"
    );
    Ok(EncodedQuery {
        program,
        polarity,
        ingress,
        description,
    })
}
