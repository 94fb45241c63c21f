//! innkeep — a reservation and check-in consistency engine. Rooms carry a
//! half-open interval ledger of active stays; every booking mutation is
//! serialized per room and journaled before it is acknowledged.

pub mod directory;
pub mod hotel;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod passcode;
pub mod wal;
pub mod wire;
