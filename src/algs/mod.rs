//! Message passing and wire helpers shared by the clustering and balancing
//! algorithms.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
