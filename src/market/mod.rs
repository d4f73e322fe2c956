pub mod buffers;

pub use buffers::SymbolBuffer;
