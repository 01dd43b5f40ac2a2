#[cfg(test)]
pub mod http_tests;
#[cfg(test)]
pub mod relay_flow_tests;
#[cfg(test)]
pub mod utils;
