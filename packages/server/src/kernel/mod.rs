pub mod test_dependencies;
pub mod worker;

pub use worker::ProcessingWorker;
