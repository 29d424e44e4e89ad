pub mod body;
pub mod client;
pub mod connector;
pub mod dns;
pub mod pool;
pub mod stream;

pub use self::body::TracedBody;
pub use self::client::{ClientOptions, TracingClient};
