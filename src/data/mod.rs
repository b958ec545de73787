//! Data access layer.

pub mod models {
    pub use crate::models::*;
}

pub mod store {
    pub use crate::store::*;
}

pub mod pg_store {
    pub use crate::pg_store::*;
}

pub mod memory_store {
    pub use crate::memory_store::*;
}

pub mod import {
    pub use crate::import::*;
}
