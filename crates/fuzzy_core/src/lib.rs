pub mod consts;
pub mod errors;
pub mod utils;
pub mod digest;
pub mod filter;
pub mod similarity;
pub mod index;
pub mod persist;
pub mod protocol;
pub mod config;

pub use config::Config;
pub use digest::{Digest, StoredRecord};
pub use errors::{FuzzyError, Result};
pub use filter::CountingBloom;
pub use index::{FuzzyStore, StoreStats};
pub use persist::{LoadReport, Persistence, SyncReport};
pub use protocol::{Command, Opcode, Reply, Session, SessionState};
pub use similarity::{LevenshteinSimilarity, Similarity};
