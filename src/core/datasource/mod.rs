/// Datasource Module
///
/// Per-datasource connection factory and cache.
///
/// ## Architecture
///
/// - **Types** (`types.rs`): datasource identity, connection options and the raw configuration blob
/// - **Loader Interfaces** (`loader.rs`): traits implemented by backends (settings, drivers, async handles)
/// - **Settings Store** (`settings.rs`): raw configuration per datasource, resolved into settings on demand
/// - **API Cache** (`api_cache.rs`): API clients keyed by datasource and connection options
/// - **Factory** (`factory.rs`): the settings -> API client -> driver -> handle pipeline
pub mod api_cache;
pub mod factory;
pub mod loader;
pub mod settings;
pub mod types;

pub use api_cache::*;
pub use factory::*;
pub use loader::*;
pub use settings::*;
pub use types::*;
