//! # Protocol Layer
//!
//! What happens to a frame after the codec has sliced it: string fields
//! are sanitized and the packet is routed to the listeners registered for
//! its type.

pub mod dispatcher;
pub mod sanitize;
