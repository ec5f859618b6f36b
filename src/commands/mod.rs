pub mod reader;
pub mod settings;
