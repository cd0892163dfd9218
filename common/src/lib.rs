//! Shared value types for the metadata tree.

pub mod ident;
pub mod node;
pub mod value;

pub use ident::Identifier;
pub use node::NodeKind;
pub use value::{Row, Value};
