//! Question answering: retrieval across document namespaces and answer streaming

mod engine;
mod stream;

pub use engine::{QueryEngine, Retrieval};
pub use stream::{AnswerStream, FinishedAnswer, StreamOutcome, TurnRecorder};
