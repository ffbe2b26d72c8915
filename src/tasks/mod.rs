pub mod announcer;
pub mod poll_closer;
