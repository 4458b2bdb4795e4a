pub mod connector;
pub mod resolver;
pub mod stream;
pub mod transport;
