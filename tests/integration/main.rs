//! Integration tests driving the session controller end to end.

mod mock_casino;
mod session;
