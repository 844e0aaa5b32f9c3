//! Outreach-sequence subsystems. Enrollment lifecycle lives here; sequence
//! step definitions and message delivery are external collaborators.

pub mod enrollments;
