pub mod bridge;
pub mod channels;
pub mod connection;
pub mod envelope;
pub mod fanout;
pub mod registry;
pub mod router;
pub mod server;

pub use connection::{Connection, ConnectionId};
pub use fanout::{Broadcast, Client, Hub};
pub use router::{action_fn, Action, ActionResult, Reply, Route, Router};
