//! Node-level impersonation authorization backed by a live pod cache.

pub mod cache;
pub mod error;
pub mod index;
pub mod informer;
pub mod node;

pub use cache::PodCache;
pub use error::AuthzError;
pub use index::{NodeIndex, SaNode};
pub use informer::PodInformer;
pub use node::NodeAuthorizer;
