mod safe;
mod unaligned;

#[allow(unused_imports)]
pub use safe::Core;
