//! Incremental XML tokenization.
//!
//! This module is not a general XML library. It implements exactly the
//! grammar the Tiled document family needs, as a character-driven state
//! machine that can be resumed across partial input and across growth of
//! its memory budget.

pub mod encoding;
pub mod parser;

pub use encoding::{Decoded, Encoding};
pub use parser::{ParseCode, Parser};
