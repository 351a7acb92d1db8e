mod peer;

pub use peer::{ConnectionId, NetworkId, PeerId};
