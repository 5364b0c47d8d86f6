mod error;
mod id;
mod pool;

pub use error::*;
pub use id::*;
pub use pool::RedisPool;
