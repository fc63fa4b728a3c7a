pub mod config;
pub mod guard;
pub mod logging;
pub mod normalize;
pub mod storage;
pub mod table;
pub mod workflow;

pub use normalize::{dedup_key, normalize, CellValue, KEY_LEN};
pub use storage::{PhoneRecord, PhoneStore, StoreConfig, StoreError, StoreStats};
pub use workflow::{filter_batch, partition, FilterOptions, FilterOutcome};
