pub mod extractors;
pub mod health_handlers;
pub mod ingest_handlers;
pub mod link_handlers;
pub mod stream_handlers;
pub mod token_handlers;
