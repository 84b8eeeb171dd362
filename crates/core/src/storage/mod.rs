mod error;
mod traits;

pub use error::{Result, StoreError};
pub use traits::BackingStore;
