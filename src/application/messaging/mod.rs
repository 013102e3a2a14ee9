//! Message handling - turns raw platform text into structured messages

pub mod parser;

pub use parser::MessageParser;
