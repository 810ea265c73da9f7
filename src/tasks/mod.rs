mod connectivity;
mod processor_task;

pub use connectivity::ConnectivityMonitor;
pub use processor_task::ProcessorTask;
