pub mod candidate;
pub mod grouper;
pub mod probes;
pub mod processor;
pub mod tokens;
