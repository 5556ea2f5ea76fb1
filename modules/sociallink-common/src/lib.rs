pub mod config;
pub mod error;
pub mod types;

pub use config::{
    load_config, parse_config, FileConfig, MirrorStrategy, ProxyConfig, RenderBackend,
    UaStrategy,
};
pub use error::{ResolveError, Result};
pub use types::*;
