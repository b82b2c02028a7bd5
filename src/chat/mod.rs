//! Chat core: presence edges and the per-connection message router.

pub mod presence;
pub mod router;
