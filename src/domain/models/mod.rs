mod change_event;
mod chunk;
mod config;
mod dependency;
mod file_record;
mod history;
mod language;
mod search_result;

pub use change_event::*;
pub use chunk::*;
pub use config::*;
pub use dependency::*;
pub use file_record::*;
pub use history::*;
pub use language::*;
pub use search_result::*;
