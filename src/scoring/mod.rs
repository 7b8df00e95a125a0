//! Scoring Module
//!
//! The ranking algorithm is an external collaborator: dataset entities only see the
//! `Scorer` trait. Two implementations ship with the node:
//!
//! - **`KeywordScorer`**: local token-overlap ranking built on the tokenizer.
//! - **`ChatScorer`**: remote ranking through an OpenAI-compatible chat completion API.

pub mod scorer;
pub mod tokenizer;
