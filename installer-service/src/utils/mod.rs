pub mod disk;
pub mod logging;
pub mod path_resolver;
pub mod validation;
