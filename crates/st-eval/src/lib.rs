//! # st-eval
//!
//! Candidate evaluation for Simtune: rewrites parameterised model artifacts
//! and submits them to the remote simulation service, turning its answer into
//! a cost the search backend can minimise.

mod client;
mod rewriter;

pub use client::{
    parse_cost, required_inputs, DispatchResponse, Dispatcher, EvaluationClient,
    EvaluationRequest, EvaluatorConfig, HttpDispatcher, PayloadPart, ARTIFACT_FIELD,
    LOG_PARSER_FIELD,
};
pub use rewriter::{
    rewrite_source, ArtifactRewriter, Declaration, DeclarationType, RewrittenArtifact,
};
