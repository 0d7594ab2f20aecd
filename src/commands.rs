pub mod alarms;
pub mod boost;
pub mod monitor;
pub mod registers;
pub mod set;
pub mod snapshot;
