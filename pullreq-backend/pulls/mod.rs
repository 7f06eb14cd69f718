pub mod access;
pub mod compare;
pub mod creator;
pub mod diff;
pub mod error;
pub mod metadata;

#[cfg(test)]
pub(crate) mod testing;
