pub mod flattened;
pub mod key;
pub mod provider;
pub mod source;

pub use flattened::FlattenedMap;
pub use key::convert_key;
pub use provider::{ResourceConfigProvider, flatten_resources};
pub use source::ResourceSource;
