// Domain-layer modules: lifecycle policy and the services built on it
pub mod lifecycle {
    pub use crate::lifecycle::*;
}

pub mod audit {
    pub use crate::audit::*;
}

pub mod leads {
    pub use crate::leads::*;
}

pub mod tasks {
    pub use crate::tasks::*;
}

pub mod opportunities {
    pub use crate::opportunities::*;
}

pub mod directory {
    pub use crate::directory::*;
}

pub mod email {
    pub use crate::email::*;
}

pub mod settings {
    pub use crate::settings::*;
}
