//! Dense matrices distributed by contiguous row blocks over an SPMD process group.

pub mod dense;
pub mod distributed;
pub mod error;
pub mod output;
pub mod stats;
