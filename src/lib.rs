//! swapbot - a chat bot whose features are hot-swappable shared-library extensions

pub mod domain;
pub mod application;
pub mod infrastructure;
