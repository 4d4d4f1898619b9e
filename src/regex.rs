//! Regular expression backend selected by Cargo feature.
//!
//! `regex` is the default; `lite` swaps in `regex-lite` for smaller builds.
//! Every pattern in the crate sticks to the syntax both engines share.

#[cfg(feature = "regex")]
pub(crate) use ::regex::Regex;

#[cfg(all(feature = "lite", not(feature = "regex")))]
pub(crate) use ::regex_lite::Regex;

#[cfg(not(any(feature = "regex", feature = "lite")))]
compile_error!("either the `regex` or the `lite` feature must be enabled");
