//! Box levels, connectors and patch levels.

pub mod box_level;
pub mod connector;
pub mod patch_level;
pub mod rank_group;

pub use box_level::{BoxId, BoxLevel, MappedBox};
pub use connector::Connector;
pub use patch_level::{CellData, Patch, PatchLevel};
pub use rank_group::RankGroup;
