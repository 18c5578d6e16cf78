//! Application workflows over the interfaces: indexing, background
//! coordination and the three query modes.

mod architecture_overview;
mod chat;
mod coordinator;
mod impact;
mod index_workspace;
mod navigator_search;

pub use architecture_overview::*;
pub use chat::*;
pub use coordinator::*;
pub use impact::*;
pub use index_workspace::*;
pub use navigator_search::*;
