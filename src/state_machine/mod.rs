pub mod rss;
pub mod state;

pub use rss::{RssMachine, RssStatus};
pub use state::{StateDef, StateMachine};
