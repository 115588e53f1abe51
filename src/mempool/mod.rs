pub mod pool;

pub use pool::{Mempool, MempoolStats};
