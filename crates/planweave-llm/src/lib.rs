pub mod completion;
pub mod retry;

pub use completion::{complete, complete_messages, Completion};
pub use retry::RetryingClient;
