pub mod blocks;
pub mod commands;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod feed_in;
pub mod keys;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod transport;
