pub mod features;
pub mod ingest;
pub mod scaling;
pub mod windowing;

pub use features::calendar_features;
pub use ingest::TimeSeriesTable;
pub use scaling::{StandardScaler, TargetScaler};
pub use windowing::{create_sequences, train_test_split};
