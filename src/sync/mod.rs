pub mod follower;
pub mod leader;
pub mod wire;

pub use follower::{KeySyncFollower, PendingExchange};
pub use leader::KeySyncLeader;
pub use wire::{KeySyncRequest, KeySyncResponse};

/// Follower-side states of a single key sync exchange. `Failed` is terminal
/// and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    Start,
    AwaitingResponse,
    Complete,
    Failed,
}

/// Leader-side states of a single key sync exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    AwaitingRequest,
    VerifyingPeer,
    Authorizing,
    Complete,
    Failed,
}
