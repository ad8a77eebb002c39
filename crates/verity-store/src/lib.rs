//! Regulatory evidence retrieval: the vector-index capability, an in-memory
//! index, a LanceDB index, and the retrying retrieval client.

mod error;
pub use error::RetrievalError;

mod index;
pub use index::{IndexHit, VectorIndex};

mod memory;
pub use memory::MemoryIndex;

mod retrieval;
pub use retrieval::{RetrievalClient, RetryPolicy, rank_hits};

#[cfg(feature = "lancedb")]
mod lance;
#[cfg(feature = "lancedb")]
pub use lance::{DEFAULT_TABLE, LanceIndex};
