mod error;
mod keys;
mod patterns;
mod serialization;
mod traits;

pub use error::{CacheError, Result};
pub use keys::{
    category_key, namespace_pattern, order_key, product_key, product_list_key, rate_limit_key,
    user_key,
};
pub use patterns::pattern_matches;
pub use serialization::{deserialize_value, serialize_value};
pub use traits::{Cache, CacheConnector, CounterStore, DistributedCache, ExistenceFilter};
