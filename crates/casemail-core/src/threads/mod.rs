//! Conversation threads
//!
//! Threads are never stored. They are rebuilt from the message store on
//! every read so they always reflect the current classification state.

mod assembler;
mod headers;
mod service;
mod subject;

pub use assembler::{build_thread, dominant_case, group_into_threads, ParticipantRole, Thread, ThreadParticipant};
pub use headers::{parse_headers, parse_message_id, ThreadHeaders};
pub use service::ThreadService;
pub use subject::{normalize_subject, NO_SUBJECT};
