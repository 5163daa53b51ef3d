//! Minimal HTTP surface: the one contract the core owns per §1/§4.6 — the
//! LiveLog Hub's WebSocket channel. CRUD, auth, and the web UI are
//! out-of-scope collaborators this crate does not implement.

mod server;
mod ws;

pub use server::{start_http_server, ApiState};
