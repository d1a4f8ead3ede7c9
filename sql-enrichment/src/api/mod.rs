pub mod errors;

pub use errors::{
    ConfigError, DispatchError, EnrichmentError, EnrichmentFailure, EnvelopeError,
    ExtractionError,
};
