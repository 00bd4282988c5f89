pub mod backend;
pub mod delegate;
pub mod sink;
pub mod source;
