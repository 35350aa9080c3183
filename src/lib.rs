pub mod aggregation;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod container;
pub mod cube;
pub mod document;
pub mod encoding;
pub mod error;
mod flock;
pub mod hasher;
pub mod row;
pub mod session;
pub mod value;

pub use aggregation::{Accumulator, AggregationFunction, AggregationRegistry};
pub use cancel::CancelToken;
pub use config::{EngineConfig, StorageMode};
pub use container::{CachedList, SpillArea};
pub use cube::{AggregationResultSet, Cube, CubeMaterializer, EdgeNavigator};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use row::{Expression, RowSource};
pub use session::Session;
pub use value::{DataType, Value};
