//! Connection lifecycle core: slot ownership, role strategies, passkey
//! coordination, and the loop that ties them to the host stack's events.

pub mod lifecycle;
pub mod pairing;
pub mod role;
pub mod slot;

pub use lifecycle::{ConnLoop, LifecycleState};
pub use pairing::{PairingRequest, PasskeyOutcome};
pub use role::{Central, FoundDisposition, Peripheral, RoleStrategy};
pub use slot::ConnectionSlot;
