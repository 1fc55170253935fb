//! Intel Guard Classifiers
//!
//! Text classification behind a single trait:
//! - **Keyword**: taxonomy keyword heuristic, no dependencies
//! - **Embedding**: distance to per-label prototype centroids, using either
//!   a local hashing embedder or an OpenAI-compatible embeddings API
//!
//! Every classifier returns a [`Prediction`], which guarantees normalized
//! probabilities and `label == argmax(probabilities)`.

pub mod traits;
pub mod backend;
pub mod keyword;
pub mod embedding;

pub use traits::*;
pub use backend::*;
pub use keyword::*;
pub use embedding::*;
