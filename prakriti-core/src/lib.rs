pub mod directory;
pub mod meta;
pub mod types;
