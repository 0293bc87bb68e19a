pub mod catalog;

pub use catalog::{cover_item, link_item, relation_item, RecordingSearchIndex, TestCatalog};

/// Install a fmt subscriber honoring RUST_LOG. Safe to call from every
/// test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
