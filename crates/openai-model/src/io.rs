mod sse;

#[cfg(test)]
pub(crate) use sse::from_static;
pub use sse::Sse;
