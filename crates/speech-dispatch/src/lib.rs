pub mod dispatch;
pub mod events;
pub mod history;
pub mod queue;
pub mod transport;
