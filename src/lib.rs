pub mod alarms;
pub mod boost;
pub mod commands;
pub mod connection;
pub mod control;
pub mod modbus;
pub mod output;
pub mod poll;
pub mod registers;
pub mod snapshot;
