/// Native module contains implementations of core traits that run
/// processes directly on the host. Isolation, if any, is provided by
/// whatever the host wraps around this process.
pub mod executor;
pub mod services;
