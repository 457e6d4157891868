//! Tool backends: the side-effecting work behind each declared tool.
//!
//! - `shell`: runs a command string through the platform shell
//! - `screenshot`: captures the primary display and builds a PNG thumbnail
//! - `web_search`: queries the search provider and trims its answer
//!
//! Backends report failures with `anyhow`; the executor in
//! `agent_core::tool_router` turns every outcome into a `ToolResult`.

pub mod screenshot;
pub mod shell;
pub mod web_search;

pub use screenshot::{ScreenCapturer, SystemScreenCapturer};
pub use web_search::{SearchProvider, SerpApiClient};
