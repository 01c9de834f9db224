//! Raw text protocol: newline-terminated UTF-8 lines.
//!
//! The simplest of the three wire formats accepted on the chat port. A
//! message is everything up to and including `\n`; the delimiter is part of
//! the relayed payload.

pub mod parser;
