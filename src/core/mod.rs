pub mod controller;
pub mod events;
pub mod exporter;
pub mod loader;
pub mod recorder;

pub use controller::PipelineController;
pub use events::{ChannelSink, TracingSink};
pub use exporter::RowExporter;
pub use loader::{LoadOutcome, WarehouseLoader};
pub use recorder::FileRunRecorder;
