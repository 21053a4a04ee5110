pub mod engine;
pub mod types;

pub use engine::{parse_option_name, EngineConfig, EngineProcess, DEFAULT_SEARCH_TIMEOUT};
pub use types::{ProtocolError, SearchOutput};
