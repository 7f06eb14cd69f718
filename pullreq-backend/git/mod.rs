pub mod cli;
pub mod error;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;
