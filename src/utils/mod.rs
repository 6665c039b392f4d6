pub mod task_cancellation;

pub use task_cancellation::CancellationToken;
