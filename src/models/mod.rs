mod archive;
mod conversation;
mod page;

pub use archive::*;
pub use conversation::*;
pub use page::*;
